//! Environment-driven agent settings.
//!
//! Settings are derived once from the host process environment and passed
//! through to every refresh attempt, so the remote-triggered and
//! local-triggered paths never drift apart on directories, tags, or policy.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Device configuration endpoint the repository URL is derived from.
const ENV_CONFIG_URL: &str = "FLEET_UPDATE_CONFIG_URL";
/// Directory holding the trusted root and refreshed metadata.
const ENV_SOTA_DIR: &str = "FLEET_UPDATE_SOTA_DIR";
/// Update channel tag attached to every remote fetch.
const ENV_TAG: &str = "FLEET_UPDATE_TAG";
/// Per-fetch deadline, in seconds.
const ENV_FETCH_TIMEOUT: &str = "FLEET_UPDATE_FETCH_TIMEOUT_SECS";
/// TCP port of the HTTP control API.
const ENV_HTTP_PORT: &str = "FLEET_UPDATE_HTTP_PORT";
/// Unix socket path of the IPC control API.
const ENV_SOCKET: &str = "FLEET_UPDATE_SOCKET";
/// Whether a local (hint-provided) refresh replaces the shared trusted view.
const ENV_COMMIT_LOCAL: &str = "FLEET_UPDATE_COMMIT_LOCAL";
/// Whether cached target filenames carry their sha256 prefix.
const ENV_PREFIX_HASH: &str = "FLEET_UPDATE_PREFIX_TARGETS_WITH_HASH";

const DEFAULT_SOTA_DIR: &str = "/var/sota";
/// Subdirectory of the sota dir where target payloads are cached.
const DOWNLOAD_SUBDIR: &str = "download";
const DEFAULT_TAG: &str = "main";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HTTP_PORT: u16 = 8787;
const DEFAULT_SOCKET: &str = "/run/fleet-update.sock";

/// Captures environment-derived options used to run the update agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Configuration endpoint of the device gateway; the repository URL is
    /// derived from it. Required for remote refreshes.
    pub config_url: Option<String>,
    /// Directory holding the trusted root and refreshed metadata.
    pub sota_dir: PathBuf,
    /// Update channel tag attached to every remote fetch.
    pub tag: String,
    /// Deadline applied to each individual fetch.
    pub fetch_timeout: Duration,
    /// TCP port of the HTTP control API.
    pub http_port: u16,
    /// Unix socket path of the IPC control API.
    pub socket_path: String,
    /// Whether a local (hint-provided) refresh replaces the shared view.
    pub commit_local_refresh: bool,
    /// Whether cached target filenames carry their sha256 prefix.
    pub prefix_targets_with_hash: bool,
}

impl AgentSettings {
    /// Builds settings from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let config_url = map
            .get(ENV_CONFIG_URL)
            .and_then(|value| sanitize_non_empty(value));
        let sota_dir = map
            .get(ENV_SOTA_DIR)
            .and_then(|value| sanitize_non_empty(value))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOTA_DIR));
        let tag = map
            .get(ENV_TAG)
            .and_then(|value| sanitize_non_empty(value))
            .unwrap_or_else(|| DEFAULT_TAG.to_string());
        let fetch_timeout = Duration::from_secs(
            map.get(ENV_FETCH_TIMEOUT)
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        );
        let http_port = map
            .get(ENV_HTTP_PORT)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(DEFAULT_HTTP_PORT);
        let socket_path = map
            .get(ENV_SOCKET)
            .and_then(|value| sanitize_non_empty(value))
            .unwrap_or_else(|| DEFAULT_SOCKET.to_string());
        let commit_local_refresh = parse_bool(map.get(ENV_COMMIT_LOCAL).map(String::as_str), true);
        let prefix_targets_with_hash =
            parse_bool(map.get(ENV_PREFIX_HASH).map(String::as_str), true);

        Self {
            config_url,
            sota_dir,
            tag,
            fetch_timeout,
            http_port,
            socket_path,
            commit_local_refresh,
            prefix_targets_with_hash,
        }
    }

    /// Directory holding the trusted root and refreshed metadata.
    pub fn local_metadata_dir(&self) -> PathBuf {
        self.sota_dir.clone()
    }

    /// Directory where target payloads are cached.
    pub fn local_targets_dir(&self) -> PathBuf {
        self.sota_dir.join(DOWNLOAD_SUBDIR)
    }
}

/// Parses a boolean-ish environment value, keeping the default on junk input.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// Returns a trimmed copy of the value, or `None` when it is blank.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
