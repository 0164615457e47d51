//! Metadata source selection.
//!
//! A refresh either talks to the TUF repository derived from the device's
//! configuration endpoint or replays a snapshot from a local directory. The
//! set of source kinds is closed; new kinds extend the enum and the resolver
//! rather than going through a plugin seam.

use std::fmt;
use std::path::PathBuf;

/// Path suffix of the configuration endpoint.
const CONFIG_SUFFIX: &str = "/config";
/// Replacement suffix selecting the TUF repository on the same gateway.
const REPO_SUFFIX: &str = "/repo";

/// Where refresh metadata comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositorySource {
    /// Remote TUF repository rooted at the device gateway.
    Remote {
        /// Base URL of the repository.
        base_url: String,
    },
    /// Local snapshot directory, used for offline and diagnostic refreshes.
    Local {
        /// Directory holding the snapshot metadata files.
        path: PathBuf,
    },
}

impl RepositorySource {
    /// Returns the location of a named resource within this source.
    pub fn resource(&self, name: &str) -> String {
        match self {
            RepositorySource::Remote { base_url } => {
                format!("{}/{}", base_url.trim_end_matches('/'), name)
            }
            RepositorySource::Local { path } => path.join(name).to_string_lossy().into_owned(),
        }
    }

    /// Returns `true` when this source fetches over the network.
    pub fn is_remote(&self) -> bool {
        matches!(self, RepositorySource::Remote { .. })
    }
}

impl fmt::Display for RepositorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositorySource::Remote { base_url } => write!(f, "remote:{base_url}"),
            RepositorySource::Local { path } => write!(f, "local:{}", path.display()),
        }
    }
}

/// Chooses the metadata source for a refresh attempt.
///
/// An empty hint selects the remote repository derived from the configuration
/// endpoint; anything else is taken verbatim as a local snapshot path. The
/// path is not validated here; the root-of-trust check happens when the
/// refresh configuration is built.
pub fn resolve(hint: Option<&str>, config_url: &str) -> RepositorySource {
    match hint {
        Some(path) if !path.is_empty() => RepositorySource::Local {
            path: PathBuf::from(path),
        },
        _ => RepositorySource::Remote {
            base_url: derive_repo_url(config_url),
        },
    }
}

/// Derives the repository URL from the configuration endpoint.
///
/// Deployed gateways expose `/config` and `/repo` side by side on the same
/// host; only the first occurrence is substituted.
pub fn derive_repo_url(config_url: &str) -> String {
    config_url.replacen(CONFIG_SUFFIX, REPO_SUFFIX, 1)
}
