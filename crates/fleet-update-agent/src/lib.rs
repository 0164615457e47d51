//! Transport bindings for the fleet-update control plane.
//!
//! Each binding maps the refresh service's operations 1:1 onto its own
//! request/response shape; the orchestration itself lives in
//! `fleet-update-core`.

pub mod http;
pub mod ipc;
