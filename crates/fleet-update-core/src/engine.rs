//! Trust-engine adapter over rust-tuf.
//!
//! The hard parts of repository verification (signature thresholds, role
//! chains, rollback protection) live in the `tuf` crate. This module feeds
//! it the metadata fetched through the bounded fetcher in the canonical order
//! (root rotations, timestamp, snapshot, targets, delegated roles) and keeps
//! the on-disk metadata cache in sync with what was verified. Callers see the
//! narrow surface only: build from a configuration, refresh, enumerate the
//! top-level targets.

#[cfg(test)]
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tuf::database::Database;
use tuf::error::Error as TufError;
use tuf::metadata::{Metadata, MetadataPath, RawSignedMetadata, RawSignedMetadataSetBuilder};
use tuf::pouf::Pouf1;

use crate::config::AgentSettings;
use crate::fetcher::{FetchError, FetchRequest, MetadataFetcher};
use crate::source::RepositorySource;
use crate::targets::{self, TargetDescriptor, TargetError};

/// File name of the trusted root metadata.
pub const META_ROOT: &str = "root.json";
/// File name of the timestamp metadata.
const META_TIMESTAMP: &str = "timestamp.json";
/// File name of the snapshot metadata.
const META_SNAPSHOT: &str = "snapshot.json";
/// File name of the targets metadata.
const META_TARGETS: &str = "targets.json";
/// Subdirectory of the metadata dir holding delegated role metadata.
const DELEGATED_DIR: &str = "delegated";

/// Maximum number of root rotations applied in one refresh.
const MAX_ROOT_ROTATIONS: u64 = 32;
/// Maximum number of delegated roles fetched in one refresh.
const MAX_DELEGATIONS: usize = 32;

/// Metadata size budgets, matching the original updater defaults.
const ROOT_MAX_LENGTH: u64 = 512_000;
const TIMESTAMP_MAX_LENGTH: u64 = 16_384;
const SNAPSHOT_MAX_LENGTH: u64 = 2_000_000;
const TARGETS_MAX_LENGTH: u64 = 5_000_000;

#[cfg(test)]
thread_local! {
    static TUF_VERIFICATION_ENABLED: Cell<bool> = Cell::new(false);
}

/// Returns `true` when verification should be skipped (unit tests inject unsigned metadata).
fn tuf_verification_disabled() -> bool {
    #[cfg(test)]
    {
        // In tests the flag is flipped per thread so individual tests can opt
        // back into verification in isolation.
        !TUF_VERIFICATION_ENABLED.with(|flag| flag.get())
    }
    #[cfg(not(test))]
    {
        false
    }
}

#[cfg(test)]
pub(crate) fn set_tuf_verification(enabled: bool) {
    TUF_VERIFICATION_ENABLED.with(|flag| flag.set(enabled));
}

/// Returns the timestamp passed to rust-tuf when verifying metadata.
///
/// Pinned to the epoch so devices with skewed clocks can still refresh;
/// rollback protection comes from version checks, not local wall time.
fn verification_start_time() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0)
        .single()
        .expect("unix epoch should always construct")
}

/// Errors raised while building a refresh configuration or engine instance.
///
/// Always fatal to the attempt and never retried automatically.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration endpoint is set, so no remote repository can be derived.
    #[error("no configuration endpoint is set")]
    MissingEndpoint,
    /// The root-of-trust file could not be read.
    #[error("unable to read root of trust at '{}': {source}", .path.display())]
    RootOfTrust {
        /// Path that was probed for the root metadata.
        path: PathBuf,
        /// Underlying read failure.
        source: io::Error,
    },
    /// The root-of-trust bytes are not a metadata document.
    #[error("invalid root of trust: {0}")]
    InvalidRoot(#[from] serde_json::Error),
    /// The shared HTTP client could not be constructed.
    #[error("http client construction failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failures surfaced by the trust engine, fatal to the enclosing refresh.
#[derive(Debug, Error)]
pub enum TrustError {
    /// A metadata fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// rust-tuf rejected the metadata chain.
    #[error("tuf verification error: {0}")]
    Verification(#[from] TufError),
    /// Metadata could not be parsed.
    #[error("metadata error: {0}")]
    Metadata(#[from] TargetError),
    /// Persisting verified metadata failed.
    #[error("unable to persist metadata '{name}': {source}")]
    Persist {
        /// Metadata file that failed to write.
        name: String,
        /// Underlying write failure.
        source: io::Error,
    },
}

/// Everything one refresh attempt needs, assembled before the engine runs.
///
/// Built fresh per attempt by [`RefreshConfig::build`], the single
/// construction point shared by every control-surface entry, and never
/// mutated afterwards. Concurrent refreshes do not share a configuration.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Where metadata is fetched from.
    pub source: RepositorySource,
    /// Directory holding the trusted root and refreshed metadata.
    pub local_metadata_dir: PathBuf,
    /// Directory where target payloads are cached.
    pub local_targets_dir: PathBuf,
    /// Whether cached target filenames carry their sha256 prefix.
    pub prefix_targets_with_hash: bool,
    /// Whether this attempt persists refreshed metadata (and may commit).
    pub persist_metadata: bool,
    /// Deadline applied to each individual fetch.
    pub fetch_timeout: Duration,
    /// Trusted root metadata anchoring verification.
    pub root_bytes: Vec<u8>,
    /// Bounded fetcher used for every resource.
    pub fetcher: MetadataFetcher,
}

impl RefreshConfig {
    /// Builds the refresh configuration for the given source.
    ///
    /// Remote refreshes anchor on the root stored in the local metadata
    /// directory; local refreshes anchor on `root.json` inside the snapshot
    /// itself. A missing or unreadable root fails the build before anything
    /// is fetched. Local diagnostic attempts persist metadata only when the
    /// settings let them replace the shared view.
    pub fn build(
        source: RepositorySource,
        settings: &AgentSettings,
        client: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let (root_path, persist_metadata) = match &source {
            RepositorySource::Remote { .. } => {
                (settings.local_metadata_dir().join(META_ROOT), true)
            }
            RepositorySource::Local { path } => {
                (path.join(META_ROOT), settings.commit_local_refresh)
            }
        };
        let root_bytes = fs::read(&root_path).map_err(|source| ConfigError::RootOfTrust {
            path: root_path,
            source,
        })?;
        let fetcher = MetadataFetcher::new(client, settings.tag.clone());
        Ok(Self {
            source,
            local_metadata_dir: settings.local_metadata_dir(),
            local_targets_dir: settings.local_targets_dir(),
            prefix_targets_with_hash: settings.prefix_targets_with_hash,
            persist_metadata,
            fetch_timeout: settings.fetch_timeout,
            root_bytes,
            fetcher,
        })
    }
}

/// One refresh attempt's view of the trust engine.
///
/// An instance is built per attempt and discarded afterwards; it never shares
/// verification state with concurrent attempts.
#[derive(Debug)]
pub struct TrustEngine {
    config: RefreshConfig,
    root_version: u64,
    targets: BTreeMap<String, TargetDescriptor>,
}

impl TrustEngine {
    /// Builds an engine instance from a refresh configuration.
    ///
    /// A root that is not even a JSON document fails here, before any fetch.
    pub fn new(config: RefreshConfig) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_slice(&config.root_bytes)?;
        let root_version = value
            .pointer("/signed/version")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        Ok(Self {
            config,
            root_version,
            targets: BTreeMap::new(),
        })
    }

    /// Refreshes the trusted metadata set from the configured source.
    ///
    /// Fetches are strictly sequential: root rotations, then timestamp,
    /// snapshot, targets, and finally delegated roles. Any failure aborts the
    /// attempt, and nothing is persisted unless the whole chain verified.
    pub async fn refresh(&mut self) -> Result<(), TrustError> {
        let roots = self.fetch_root_rotations().await?;
        let timestamp = self.fetch_meta(META_TIMESTAMP, TIMESTAMP_MAX_LENGTH).await?;
        let snapshot = self.fetch_meta(META_SNAPSHOT, SNAPSHOT_MAX_LENGTH).await?;
        let targets_bytes = self.fetch_meta(META_TARGETS, TARGETS_MAX_LENGTH).await?;
        let delegated = self.fetch_delegated_metadata(&targets_bytes).await?;

        if !tuf_verification_disabled() {
            self.verify(&roots, &timestamp, &snapshot, &targets_bytes, &delegated)?;
        }

        self.targets = targets::parse_targets_map_from_bytes(&targets_bytes)?;
        if self.config.persist_metadata {
            self.persist(&roots, &timestamp, &snapshot, &targets_bytes, &delegated)?;
        }
        debug!(
            source = %self.config.source,
            targets = self.targets.len(),
            "trusted metadata refreshed"
        );
        Ok(())
    }

    /// Returns the verified top-level target map.
    pub fn top_level_targets(&self) -> &BTreeMap<String, TargetDescriptor> {
        &self.targets
    }

    /// Consumes the engine, yielding the verified target map.
    pub fn into_top_level_targets(self) -> BTreeMap<String, TargetDescriptor> {
        self.targets
    }

    /// Probes for root metadata newer than the trusted version.
    ///
    /// Repositories publish rotated roots as `{version}.root.json`; the probe
    /// stops at the first missing version. `NotFound` is the expected
    /// terminal answer, every other failure aborts the refresh.
    async fn fetch_root_rotations(&self) -> Result<Vec<Vec<u8>>, TrustError> {
        let mut rotations = Vec::new();
        let upper = self.root_version + MAX_ROOT_ROTATIONS;
        let mut version = self.root_version + 1;
        while version <= upper {
            let name = format!("{version}.{META_ROOT}");
            match self.fetch_bytes(&name, ROOT_MAX_LENGTH).await {
                Ok(bytes) => rotations.push(bytes),
                Err(FetchError::NotFound { .. }) => break,
                Err(err) => return Err(err.into()),
            }
            version += 1;
        }
        Ok(rotations)
    }

    /// Fetches one metadata document from the configured source.
    async fn fetch_meta(&self, name: &str, max_length: u64) -> Result<Vec<u8>, TrustError> {
        self.fetch_bytes(name, max_length)
            .await
            .map_err(TrustError::from)
    }

    async fn fetch_bytes(&self, name: &str, max_length: u64) -> Result<Vec<u8>, FetchError> {
        let resource = self.config.source.resource(name);
        self.config
            .fetcher
            .fetch(FetchRequest {
                resource: &resource,
                max_length,
                timeout: self.config.fetch_timeout,
            })
            .await
    }

    /// Fetches delegated role metadata referenced by the targets document.
    async fn fetch_delegated_metadata(
        &self,
        top_targets: &[u8],
    ) -> Result<Vec<(String, Vec<u8>)>, TrustError> {
        let value: Value = serde_json::from_slice(top_targets).map_err(TargetError::from)?;
        let roles = value
            .pointer("/signed/delegations/roles")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let mut delegated = Vec::new();
        if let Value::Array(entries) = roles {
            for role in entries.iter().take(MAX_DELEGATIONS) {
                let Some(name) = role.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let bytes = self
                    .fetch_bytes(&format!("{name}.json"), TARGETS_MAX_LENGTH)
                    .await?;
                delegated.push((name.to_string(), bytes));
            }
        }
        Ok(delegated)
    }

    /// Runs the fetched metadata chain through the rust-tuf database.
    fn verify(
        &self,
        roots: &[Vec<u8>],
        timestamp: &[u8],
        snapshot: &[u8],
        targets_bytes: &[u8],
        delegated: &[(String, Vec<u8>)],
    ) -> Result<(), TrustError> {
        let now = verification_start_time();
        let trusted = RawSignedMetadataSetBuilder::<Pouf1>::new()
            .root(RawSignedMetadata::new(self.config.root_bytes.clone()))
            .build();
        let mut db = Database::from_trusted_metadata_with_start_time(&trusted, &now)?;

        for bytes in roots {
            let current = db.trusted_root().version();
            let version = targets::meta_version(bytes);
            let Ok(version) = u32::try_from(version) else {
                return Err(TrustError::Verification(
                    TufError::MetadataVersionMustBeSmallerThanMaxU32(MetadataPath::root()),
                ));
            };
            if version <= current {
                // Stale rotation already trusted.
                continue;
            }
            db.update_root(&RawSignedMetadata::new(bytes.clone()))?;
        }

        let set = RawSignedMetadataSetBuilder::<Pouf1>::new()
            .timestamp(RawSignedMetadata::new(timestamp.to_vec()))
            .snapshot(RawSignedMetadata::new(snapshot.to_vec()))
            .targets(RawSignedMetadata::new(targets_bytes.to_vec()))
            .build();
        db.update_metadata_with_start_time(&set, &now)?;

        let parent = MetadataPath::targets();
        for (role, bytes) in delegated {
            let path = MetadataPath::new(role.clone())?;
            db.update_delegated_targets(&now, &parent, &path, &RawSignedMetadata::new(bytes.clone()))?;
        }
        Ok(())
    }

    /// Writes the verified metadata set into the local metadata directory.
    fn persist(
        &self,
        roots: &[Vec<u8>],
        timestamp: &[u8],
        snapshot: &[u8],
        targets_bytes: &[u8],
        delegated: &[(String, Vec<u8>)],
    ) -> Result<(), TrustError> {
        let dir = &self.config.local_metadata_dir;
        fs::create_dir_all(dir).map_err(|source| TrustError::Persist {
            name: dir.display().to_string(),
            source,
        })?;
        if let Some(latest) = roots.last() {
            write_meta(dir, META_ROOT, latest)?;
        }
        write_meta(dir, META_TIMESTAMP, timestamp)?;
        write_meta(dir, META_SNAPSHOT, snapshot)?;
        write_meta(dir, META_TARGETS, targets_bytes)?;
        if !delegated.is_empty() {
            let delegated_dir = dir.join(DELEGATED_DIR);
            fs::create_dir_all(&delegated_dir).map_err(|source| TrustError::Persist {
                name: delegated_dir.display().to_string(),
                source,
            })?;
            for (role, bytes) in delegated {
                write_meta(&delegated_dir, &format!("{role}.json"), bytes)?;
            }
        }
        Ok(())
    }
}

/// Writes one metadata document under the given directory.
fn write_meta(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), TrustError> {
    fs::write(dir.join(name), bytes).map_err(|source| TrustError::Persist {
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::resolve;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use tempfile::TempDir;

    /// Builds deterministic unsigned metadata documents for tests.
    fn mk_meta(meta_type: &str, version: u64) -> Vec<u8> {
        serde_json::json!({
            "signed": {
                "_type": meta_type,
                "version": version,
                "expires": "2030-01-01T00:00:00Z"
            },
            "signatures": []
        })
        .to_string()
        .into_bytes()
    }

    /// Builds a targets document naming the provided targets.
    fn mk_targets(version: u64, names: &[&str]) -> Vec<u8> {
        let mut targets = serde_json::Map::new();
        for name in names {
            targets.insert(
                name.to_string(),
                serde_json::json!({ "length": 4, "hashes": { "sha256": "00" } }),
            );
        }
        serde_json::json!({
            "signed": {
                "_type": "targets",
                "version": version,
                "expires": "2030-01-01T00:00:00Z",
                "targets": targets
            },
            "signatures": []
        })
        .to_string()
        .into_bytes()
    }

    fn settings(dir: &Path, config_url: &str) -> AgentSettings {
        AgentSettings::from_env_iter(vec![
            ("FLEET_UPDATE_SOTA_DIR", dir.to_str().unwrap()),
            ("FLEET_UPDATE_CONFIG_URL", config_url),
        ])
    }

    fn expect_get(server: &Server, path: &str, body: Vec<u8>) {
        server.expect(
            Expectation::matching(all_of![request::method("GET"), request::path(path.to_string())])
                .respond_with(status_code(200).body(body)),
        );
    }

    fn expect_missing(server: &Server, path: &str) {
        server.expect(
            Expectation::matching(all_of![request::method("GET"), request::path(path.to_string())])
                .respond_with(status_code(404)),
        );
    }

    /// A missing root of trust fails the configuration build, not the engine.
    #[test]
    fn build_fails_without_root_of_trust() {
        let sota = TempDir::new().unwrap();
        let settings = settings(sota.path(), "https://gw/1/device/config");
        let source = resolve(None, settings.config_url.as_deref().unwrap());
        let err = RefreshConfig::build(source, &settings, reqwest::Client::new()).unwrap_err();
        assert!(matches!(err, ConfigError::RootOfTrust { .. }));
    }

    /// A root that is not JSON fails engine construction.
    #[test]
    fn engine_rejects_corrupt_root() {
        let sota = TempDir::new().unwrap();
        std::fs::write(sota.path().join(META_ROOT), b"not json").unwrap();
        let settings = settings(sota.path(), "https://gw/1/device/config");
        let source = resolve(None, settings.config_url.as_deref().unwrap());
        let config = RefreshConfig::build(source, &settings, reqwest::Client::new()).unwrap();
        let err = TrustEngine::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoot(_)));
    }

    /// Remote refresh walks the canonical fetch order, applies a root
    /// rotation, pulls delegated roles, and persists the results.
    #[tokio::test]
    async fn remote_refresh_fetches_and_persists_metadata() {
        let server = Server::run();
        let rotated_root = mk_meta("root", 2);
        let targets_doc = serde_json::json!({
            "signed": {
                "_type": "targets",
                "version": 2,
                "expires": "2030-01-01T00:00:00Z",
                "targets": {
                    "app.img": { "length": 4, "hashes": { "sha256": "00" } }
                },
                "delegations": {
                    "roles": [ { "name": "extra" } ]
                }
            },
            "signatures": []
        })
        .to_string()
        .into_bytes();

        expect_get(&server, "/1/device/repo/2.root.json", rotated_root.clone());
        expect_missing(&server, "/1/device/repo/3.root.json");
        expect_get(&server, "/1/device/repo/timestamp.json", mk_meta("timestamp", 2));
        expect_get(&server, "/1/device/repo/snapshot.json", mk_meta("snapshot", 2));
        expect_get(&server, "/1/device/repo/targets.json", targets_doc);
        expect_get(&server, "/1/device/repo/extra.json", mk_targets(1, &["extra.img"]));

        let sota = TempDir::new().unwrap();
        std::fs::write(sota.path().join(META_ROOT), mk_meta("root", 1)).unwrap();
        let config_url = server.url_str("/1/device/config");
        let settings = settings(sota.path(), &config_url);
        let source = resolve(None, &config_url);
        let config = RefreshConfig::build(source, &settings, reqwest::Client::new()).unwrap();
        let mut engine = TrustEngine::new(config).unwrap();
        engine.refresh().await.unwrap();

        assert_eq!(engine.top_level_targets().len(), 1);
        assert!(engine.top_level_targets().contains_key("app.img"));

        // Persisted cache reflects the refreshed chain, rotation included.
        assert_eq!(
            std::fs::read(sota.path().join(META_ROOT)).unwrap(),
            rotated_root
        );
        assert!(sota.path().join("timestamp.json").exists());
        assert!(sota.path().join("snapshot.json").exists());
        assert!(sota.path().join("targets.json").exists());
        assert!(sota.path().join("delegated/extra.json").exists());
    }

    /// Local snapshot refresh reads every document from the snapshot dir.
    #[tokio::test]
    async fn local_refresh_reads_the_snapshot_directory() {
        let snapshot = TempDir::new().unwrap();
        std::fs::write(snapshot.path().join(META_ROOT), mk_meta("root", 1)).unwrap();
        std::fs::write(snapshot.path().join("timestamp.json"), mk_meta("timestamp", 1)).unwrap();
        std::fs::write(snapshot.path().join("snapshot.json"), mk_meta("snapshot", 1)).unwrap();
        std::fs::write(
            snapshot.path().join("targets.json"),
            mk_targets(1, &["offline.img"]),
        )
        .unwrap();

        let sota = TempDir::new().unwrap();
        let settings = settings(sota.path(), "https://gw/1/device/config");
        let source = resolve(
            Some(snapshot.path().to_str().unwrap()),
            settings.config_url.as_deref().unwrap(),
        );
        let config = RefreshConfig::build(source, &settings, reqwest::Client::new()).unwrap();
        let mut engine = TrustEngine::new(config).unwrap();
        engine.refresh().await.unwrap();

        assert!(engine.top_level_targets().contains_key("offline.img"));
        // Local commits are enabled by default, so the snapshot lands in the cache.
        assert!(sota.path().join("targets.json").exists());
    }

    /// A fetch failure mid-chain aborts the attempt and persists nothing.
    #[tokio::test]
    async fn failed_fetch_aborts_without_persisting() {
        let server = Server::run();
        expect_missing(&server, "/1/device/repo/2.root.json");
        server.expect(
            Expectation::matching(all_of![request::method("GET"), request::path("/1/device/repo/timestamp.json")])
                .respond_with(status_code(500)),
        );

        let sota = TempDir::new().unwrap();
        std::fs::write(sota.path().join(META_ROOT), mk_meta("root", 1)).unwrap();
        let config_url = server.url_str("/1/device/config");
        let settings = settings(sota.path(), &config_url);
        let source = resolve(None, &config_url);
        let config = RefreshConfig::build(source, &settings, reqwest::Client::new()).unwrap();
        let mut engine = TrustEngine::new(config).unwrap();

        let err = engine.refresh().await.unwrap_err();
        assert!(matches!(
            err,
            TrustError::Fetch(FetchError::HttpStatus { status: 500, .. })
        ));
        assert!(!sota.path().join("timestamp.json").exists());
    }

    /// With verification enabled, unsigned metadata is rejected by rust-tuf
    /// before anything is parsed into the target map.
    #[tokio::test]
    async fn verification_rejects_unsigned_metadata() {
        set_tuf_verification(true);

        let snapshot = TempDir::new().unwrap();
        std::fs::write(snapshot.path().join(META_ROOT), mk_meta("root", 1)).unwrap();
        std::fs::write(snapshot.path().join("timestamp.json"), mk_meta("timestamp", 1)).unwrap();
        std::fs::write(snapshot.path().join("snapshot.json"), mk_meta("snapshot", 1)).unwrap();
        std::fs::write(
            snapshot.path().join("targets.json"),
            mk_targets(1, &["offline.img"]),
        )
        .unwrap();

        let sota = TempDir::new().unwrap();
        let settings = settings(sota.path(), "https://gw/1/device/config");
        let source = resolve(
            Some(snapshot.path().to_str().unwrap()),
            settings.config_url.as_deref().unwrap(),
        );
        let config = RefreshConfig::build(source, &settings, reqwest::Client::new()).unwrap();
        let mut engine = TrustEngine::new(config).unwrap();

        let err = engine.refresh().await.unwrap_err();
        assert!(matches!(err, TrustError::Verification(_)));
        assert!(engine.top_level_targets().is_empty());

        set_tuf_verification(false);
    }

    /// With local commits disabled, a snapshot refresh leaves the cache alone.
    #[tokio::test]
    async fn local_refresh_without_commit_skips_persistence() {
        let snapshot = TempDir::new().unwrap();
        std::fs::write(snapshot.path().join(META_ROOT), mk_meta("root", 1)).unwrap();
        std::fs::write(snapshot.path().join("timestamp.json"), mk_meta("timestamp", 1)).unwrap();
        std::fs::write(snapshot.path().join("snapshot.json"), mk_meta("snapshot", 1)).unwrap();
        std::fs::write(
            snapshot.path().join("targets.json"),
            mk_targets(1, &["offline.img"]),
        )
        .unwrap();

        let sota = TempDir::new().unwrap();
        let settings = AgentSettings::from_env_iter(vec![
            ("FLEET_UPDATE_SOTA_DIR", sota.path().to_str().unwrap()),
            ("FLEET_UPDATE_CONFIG_URL", "https://gw/1/device/config"),
            ("FLEET_UPDATE_COMMIT_LOCAL", "false"),
        ]);
        let source = resolve(Some(snapshot.path().to_str().unwrap()), "https://gw/1/device/config");
        let config = RefreshConfig::build(source, &settings, reqwest::Client::new()).unwrap();
        assert!(!config.persist_metadata);

        let mut engine = TrustEngine::new(config).unwrap();
        engine.refresh().await.unwrap();
        assert!(engine.top_level_targets().contains_key("offline.img"));
        assert!(!sota.path().join("targets.json").exists());
    }
}
