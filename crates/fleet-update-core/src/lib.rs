//! Core building blocks of the fleet-update control plane.
//!
//! The crate wires a size-bounded fetcher, a metadata source resolver, and a
//! rust-tuf-backed trust engine into a refresh service that owns the
//! process-wide trusted target view. Transport bindings (HTTP, IPC) live in
//! the agent crate and call into [`service::RefreshService`] only.

pub mod config;
pub mod engine;
pub mod fetcher;
pub mod service;
pub mod source;
pub mod targets;

pub use config::AgentSettings;
pub use engine::{ConfigError, RefreshConfig, TrustEngine, TrustError};
pub use fetcher::{FetchError, FetchRequest, MetadataFetcher};
pub use service::{DownloadError, RefreshError, RefreshOutcome, RefreshService, TrustedView};
pub use source::{derive_repo_url, resolve, RepositorySource};
pub use targets::{parse_targets_map_from_bytes, TargetDescriptor, TargetError};
