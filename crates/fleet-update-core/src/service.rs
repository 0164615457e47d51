//! Refresh orchestration and the process-wide trusted view.
//!
//! One service instance owns everything shared between control-surface
//! callers: the HTTP client reused across refreshes, the lock serializing
//! whole refresh attempts, and the committed [`TrustedView`]. A commit is a
//! single swap under the write lock, so readers never observe a half-updated
//! view, and a refresh future dropped mid-flight leaves the previous view in
//! place.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::AgentSettings;
use crate::engine::{ConfigError, RefreshConfig, TrustEngine, TrustError};
use crate::fetcher::{FetchError, FetchRequest, MetadataFetcher};
use crate::source::{resolve, RepositorySource};
use crate::targets::{
    physical_target_name, validate_payload_bytes, TargetDescriptor, TargetError,
};

/// Why a refresh attempt failed, surfaced verbatim to the caller.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The refresh configuration could not be built.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// A metadata fetch failed.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    /// The trust engine rejected the refreshed metadata.
    #[error("trust error: {0}")]
    Trust(TrustError),
}

impl From<TrustError> for RefreshError {
    /// Keeps fetch failures distinguishable from verification failures.
    fn from(err: TrustError) -> Self {
        match err {
            TrustError::Fetch(fetch) => RefreshError::Fetch(fetch),
            other => RefreshError::Trust(other),
        }
    }
}

/// Errors raised while caching a trusted target payload locally.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// No refresh has committed yet, so there is no view to download from.
    #[error("no trusted view has been committed")]
    NoView,
    /// The requested name is not in the committed view.
    #[error("target '{0}' is not in the trusted view")]
    UnknownTarget(String),
    /// The target name would escape the cache directory.
    #[error("target '{0}' has an unsafe path")]
    UnsafePath(String),
    /// The payload fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The payload does not match its descriptor.
    #[error(transparent)]
    Validation(#[from] TargetError),
    /// Writing the payload into the cache failed.
    #[error("unable to write target '{}': {source}", .path.display())]
    Io {
        /// Cache path that failed.
        path: PathBuf,
        /// Underlying write failure.
        source: io::Error,
    },
}

/// The committed set of trusted targets.
#[derive(Debug, Clone)]
pub struct TrustedView {
    /// Name → descriptor map from the last successful refresh.
    pub targets: BTreeMap<String, TargetDescriptor>,
    /// Source the view was refreshed from.
    pub source: RepositorySource,
    /// When the refresh committed.
    pub refreshed_at: DateTime<Utc>,
}

/// Summary returned to the caller that triggered a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Number of top-level targets in the refreshed metadata.
    pub target_count: usize,
    /// Whether the shared view was replaced by this attempt.
    pub committed: bool,
}

/// Control-plane service owning the process-wide trusted view.
#[derive(Debug)]
pub struct RefreshService {
    settings: AgentSettings,
    /// Transport client retained across refresh attempts.
    client: reqwest::Client,
    /// Serializes whole refresh attempts. Engine instances are per-attempt,
    /// but interleaved attempts would race on the metadata directory.
    refresh_gate: Mutex<()>,
    /// The committed view. Swapped wholesale on commit, never merged.
    view: RwLock<Option<TrustedView>>,
}

impl RefreshService {
    /// Builds a service from settings, constructing the shared HTTP client.
    pub fn new(settings: AgentSettings) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            settings,
            client,
            refresh_gate: Mutex::new(()),
            view: RwLock::new(None),
        })
    }

    /// Returns the settings the service was built with.
    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Returns the committed target map; empty before the first refresh.
    ///
    /// Never fails: refresh errors do not disturb the last committed view.
    pub async fn list_targets(&self) -> BTreeMap<String, TargetDescriptor> {
        self.view
            .read()
            .await
            .as_ref()
            .map(|view| view.targets.clone())
            .unwrap_or_default()
    }

    /// Returns when the current view committed, if any refresh succeeded yet.
    pub async fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.view.read().await.as_ref().map(|view| view.refreshed_at)
    }

    /// Refreshes from the remote repository derived from the config endpoint.
    pub async fn refresh_remote(&self) -> Result<RefreshOutcome, RefreshError> {
        self.refresh(None).await
    }

    /// Refreshes from a local snapshot directory.
    pub async fn refresh_local(&self, path: &str) -> Result<RefreshOutcome, RefreshError> {
        self.refresh(Some(path)).await
    }

    /// Runs one refresh attempt end to end.
    ///
    /// The attempt is all-or-nothing: configuration, fetching, and
    /// verification must all succeed before the view swap, and any error
    /// leaves the previous view untouched. No retries happen here.
    async fn refresh(&self, hint: Option<&str>) -> Result<RefreshOutcome, RefreshError> {
        let _gate = self.refresh_gate.lock().await;

        let wants_remote = hint.map_or(true, str::is_empty);
        if wants_remote && self.settings.config_url.is_none() {
            return Err(ConfigError::MissingEndpoint.into());
        }
        let config_url = self.settings.config_url.as_deref().unwrap_or_default();
        let source = resolve(hint, config_url);
        debug!(source = %source, "starting metadata refresh");

        let config = RefreshConfig::build(source.clone(), &self.settings, self.client.clone())?;
        let commit = config.persist_metadata;
        let mut engine = TrustEngine::new(config)?;
        engine.refresh().await?;

        let targets = engine.into_top_level_targets();
        let outcome = RefreshOutcome {
            target_count: targets.len(),
            committed: commit,
        };
        if commit {
            let mut guard = self.view.write().await;
            *guard = Some(TrustedView {
                targets,
                source,
                refreshed_at: Utc::now(),
            });
        }
        info!(
            targets = outcome.target_count,
            committed = outcome.committed,
            "metadata refresh succeeded"
        );
        Ok(outcome)
    }

    /// Fetches one trusted target into the local cache directory.
    ///
    /// The payload is validated against the committed descriptor (length and
    /// sha256) before it is written; the filename carries the hash prefix
    /// when the settings ask for it.
    pub async fn download_target(&self, name: &str) -> Result<PathBuf, DownloadError> {
        let (descriptor, source) = {
            let guard = self.view.read().await;
            let view = guard.as_ref().ok_or(DownloadError::NoView)?;
            let descriptor = view
                .targets
                .get(name)
                .ok_or_else(|| DownloadError::UnknownTarget(name.to_string()))?
                .clone();
            (descriptor, view.source.clone())
        };
        if !is_safe_target_name(name) {
            return Err(DownloadError::UnsafePath(name.to_string()));
        }

        let fetcher = MetadataFetcher::new(self.client.clone(), self.settings.tag.clone());
        let resource = source.resource(name);
        let max_length = u64::try_from(descriptor.length).unwrap_or(0);
        let payload = fetcher
            .fetch(FetchRequest {
                resource: &resource,
                max_length,
                timeout: self.settings.fetch_timeout,
            })
            .await?;
        validate_payload_bytes(name, &descriptor, &payload)?;

        let file_name = if self.settings.prefix_targets_with_hash {
            physical_target_name(name, &descriptor)
        } else {
            name.to_string()
        };
        let cache_path = self.settings.local_targets_dir().join(file_name);
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent).map_err(|source| DownloadError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&cache_path, &payload).map_err(|source| DownloadError::Io {
            path: cache_path.clone(),
            source,
        })?;
        info!(target_name = name, path = %cache_path.display(), "target cached");
        Ok(cache_path)
    }
}

/// Rejects target names that would write outside the cache directory.
fn is_safe_target_name(name: &str) -> bool {
    !name.starts_with('/')
        && !name
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
}
