//! IPC control API over a Unix domain socket.
//!
//! Requests and responses are single JSON lines. The methods map 1:1 onto the
//! refresh service's operations; results are reported as numeric status codes
//! so shell callers can branch on them.

use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use fleet_update_core::service::{RefreshError, RefreshOutcome, RefreshService};

/// Refresh completed and, when applicable, the view was replaced.
pub const STATUS_OK: i32 = 0;
/// The refresh configuration could not be built.
pub const STATUS_CONFIG_ERROR: i32 = 1;
/// A metadata fetch failed.
pub const STATUS_FETCH_ERROR: i32 = 2;
/// The trust engine rejected the metadata.
pub const STATUS_TRUST_ERROR: i32 = 3;
/// The request line could not be parsed.
pub const STATUS_BAD_REQUEST: i32 = 4;

/// A single control request.
#[derive(Debug, Deserialize)]
#[serde(tag = "method")]
enum IpcRequest {
    /// Returns the serialized trusted targets.
    GetTargets,
    /// Triggers a remote refresh.
    Refresh,
    /// Triggers a refresh against a local snapshot path.
    ReadLocalPath {
        /// Snapshot directory to refresh from.
        path: String,
    },
}

/// Response line written back to the caller.
#[derive(Debug, Serialize)]
struct IpcResponse {
    status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    targets: Option<Vec<serde_json::Value>>,
}

/// Guard that removes the socket file when dropped.
///
/// Tokio's `UnixListener` does not remove the socket file on drop, so an
/// unclean exit would otherwise leave a stale socket behind.
#[derive(Debug)]
pub struct SocketCleanupGuard {
    path: String,
}

impl SocketCleanupGuard {
    fn new(path: String) -> Self {
        Self { path }
    }
}

impl Drop for SocketCleanupGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove ipc socket '{}': {e}", self.path);
            }
        }
    }
}

/// Validates an IPC socket path.
///
/// Rejects empty paths, embedded NUL bytes, relative paths, and paths longer
/// than 100 bytes (safe margin under the Unix socket limit of 108).
pub fn validate_socket_path(path: &str) -> io::Result<()> {
    if path.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "ipc socket path cannot be empty",
        ));
    }
    if path.contains('\0') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "ipc socket path cannot contain null bytes",
        ));
    }
    let byte_len = path.as_bytes().len();
    if byte_len > 100 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("ipc socket path too long: {byte_len} bytes (maximum 100 bytes)"),
        ));
    }
    if !path.starts_with('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("ipc socket path must be absolute, got: {path}"),
        ));
    }
    Ok(())
}

/// Binds the IPC socket, replacing a stale socket file from a previous run.
///
/// Symlinks at the socket path are refused rather than removed.
pub fn bind(path: &str) -> io::Result<(UnixListener, SocketCleanupGuard)> {
    validate_socket_path(path)?;
    let socket_path = Path::new(path);
    if socket_path.exists() {
        let metadata = std::fs::symlink_metadata(path)?;
        if metadata.file_type().is_symlink() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("ipc socket path '{path}' is a symlink, refusing to remove"),
            ));
        }
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    Ok((listener, SocketCleanupGuard::new(path.to_string())))
}

/// Serves IPC requests until the cancellation token fires.
pub async fn serve(
    service: Arc<RefreshService>,
    listener: UnixListener,
    shutdown: CancellationToken,
) -> io::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("ipc control api shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let service = service.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(service, stream).await {
                            warn!("ipc connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("ipc accept error: {e}");
                }
            },
        }
    }
    Ok(())
}

/// Handles one connection, answering each request line in order.
async fn handle_connection(service: Arc<RefreshService>, stream: UnixStream) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => dispatch(&service, request).await,
            Err(err) => IpcResponse {
                status: STATUS_BAD_REQUEST,
                message: Some(format!("malformed request: {err}")),
                targets: None,
            },
        };
        let mut payload = serde_json::to_vec(&response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        payload.push(b'\n');
        write_half.write_all(&payload).await?;
    }
    Ok(())
}

/// Routes one request onto the matching service operation.
async fn dispatch(service: &RefreshService, request: IpcRequest) -> IpcResponse {
    match request {
        IpcRequest::GetTargets => {
            let targets = service
                .list_targets()
                .await
                .into_iter()
                .map(|(name, target)| serde_json::json!({ "name": name, "target": target }))
                .collect();
            IpcResponse {
                status: STATUS_OK,
                message: None,
                targets: Some(targets),
            }
        }
        IpcRequest::Refresh => refresh_response(service.refresh_remote().await),
        IpcRequest::ReadLocalPath { path } => refresh_response(service.refresh_local(&path).await),
    }
}

/// Shapes a refresh result into a status-code response.
fn refresh_response(result: Result<RefreshOutcome, RefreshError>) -> IpcResponse {
    match result {
        Ok(outcome) => IpcResponse {
            status: STATUS_OK,
            message: Some(format!("refreshed {} targets", outcome.target_count)),
            targets: None,
        },
        Err(err) => {
            let status = match &err {
                RefreshError::Config(_) => STATUS_CONFIG_ERROR,
                RefreshError::Fetch(_) => STATUS_FETCH_ERROR,
                RefreshError::Trust(_) => STATUS_TRUST_ERROR,
            };
            IpcResponse {
                status,
                message: Some(err.to_string()),
                targets: None,
            }
        }
    }
}
