//! HTTP control API.
//!
//! Maps the refresh service's operations 1:1 onto routes; no business logic
//! lives here beyond request/response shaping. Error bodies carry an `error`
//! kind so callers can tell configuration problems from fetch and trust
//! problems.

use std::io;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use fleet_update_core::fetcher::FetchError;
use fleet_update_core::service::{DownloadError, RefreshError, RefreshService};

const TARGETS_PATH: &str = "/targets";
const UPDATE_PATH: &str = "/targets/update";
const UPDATE_LOCAL_PREFIX: &str = "/targets/update_local/";
const DOWNLOAD_PREFIX: &str = "/targets/download/";

type HttpResponse = Response<Full<Bytes>>;

/// Runs the HTTP control API until the cancellation token fires.
pub async fn serve(
    service: Arc<RefreshService>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = tokio::task::JoinSet::new();

    loop {
        let conn = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("http control api shutting down");
                break;
            }
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("http control api accept error: {e}");
                    return Err(e);
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    // Don't kill the server on a handler panic.
                    error!("connection handler panicked: {:?}", e);
                    continue;
                }
                Ok(()) | Err(_) => continue,
            },
        };

        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let service = service.clone();
        joinset.spawn(async move {
            let handler = service_fn(move |req| control_endpoint_handler(service.clone(), req));
            if let Err(e) = server.serve_connection(conn, handler).await {
                error!("connection error: {e}");
            }
        });
    }
    Ok(())
}

/// Dispatches one request onto the matching control operation.
async fn control_endpoint_handler(
    service: Arc<RefreshService>,
    req: Request<Incoming>,
) -> http::Result<HttpResponse> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, TARGETS_PATH) => {
            let targets = service.list_targets().await;
            json_response(StatusCode::OK, json!({ "targets": targets }))
        }
        (&Method::GET, UPDATE_PATH) => refresh_result_response(service.refresh_remote().await),
        (&Method::GET, path) if path.starts_with(UPDATE_LOCAL_PREFIX) => {
            let local = local_path_from_route(path);
            refresh_result_response(service.refresh_local(&local).await)
        }
        (&Method::GET, path) if path.starts_with(DOWNLOAD_PREFIX) => {
            let name = &path[DOWNLOAD_PREFIX.len()..];
            match service.download_target(name).await {
                Ok(cached) => json_response(
                    StatusCode::OK,
                    json!({ "message": "target cached", "path": cached.display().to_string() }),
                ),
                Err(err) => download_error_response(&err),
            }
        }
        _ => {
            let mut not_found = Response::new(Full::new(Bytes::new()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Ok(not_found)
        }
    }
}

/// Extracts the snapshot path from an `update_local` route, restoring the
/// leading slash the route prefix swallowed.
fn local_path_from_route(path: &str) -> String {
    let raw = &path[UPDATE_LOCAL_PREFIX.len()..];
    if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    }
}

/// Shapes a refresh result into the transport response.
fn refresh_result_response(
    result: Result<fleet_update_core::service::RefreshOutcome, RefreshError>,
) -> http::Result<HttpResponse> {
    match result {
        Ok(outcome) => json_response(
            StatusCode::OK,
            json!({
                "message": "refresh complete",
                "targets": outcome.target_count,
                "committed": outcome.committed
            }),
        ),
        Err(err) => refresh_error_response(&err),
    }
}

/// Maps a refresh failure onto a status code and error kind.
fn refresh_error_response(err: &RefreshError) -> http::Result<HttpResponse> {
    let (status, kind) = match err {
        RefreshError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
        RefreshError::Fetch(FetchError::Timeout { .. }) => (StatusCode::GATEWAY_TIMEOUT, "fetch"),
        RefreshError::Fetch(_) => (StatusCode::BAD_GATEWAY, "fetch"),
        RefreshError::Trust(_) => (StatusCode::BAD_GATEWAY, "trust"),
    };
    error!(error = %err, kind, "refresh request failed");
    json_response(status, json!({ "error": kind, "message": err.to_string() }))
}

/// Maps a download failure onto a status code and error kind.
fn download_error_response(err: &DownloadError) -> http::Result<HttpResponse> {
    let (status, kind) = match err {
        DownloadError::NoView | DownloadError::UnknownTarget(_) => (StatusCode::NOT_FOUND, "config"),
        DownloadError::UnsafePath(_) => (StatusCode::BAD_REQUEST, "config"),
        DownloadError::Fetch(FetchError::Timeout { .. }) => (StatusCode::GATEWAY_TIMEOUT, "fetch"),
        DownloadError::Fetch(_) => (StatusCode::BAD_GATEWAY, "fetch"),
        DownloadError::Validation(_) => (StatusCode::BAD_GATEWAY, "trust"),
        DownloadError::Io { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
    };
    error!(error = %err, kind, "download request failed");
    json_response(status, json!({ "error": kind, "message": err.to_string() }))
}

/// Builds a JSON response with the given status.
fn json_response(status: StatusCode, body: serde_json::Value) -> http::Result<HttpResponse> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
}
