//! Size-bounded resource fetching.
//!
//! The trust engine treats this module as its only I/O primitive: every
//! metadata document and target payload goes through [`MetadataFetcher::fetch`].
//! Remote requests carry the device's channel tag and are rejected when the
//! response is larger than the caller's byte budget; local snapshot paths are
//! read straight from disk. No retries happen at this layer.

use std::fs;
use std::time::Duration;

use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

/// Header carrying the update channel tag on every remote fetch.
pub const TAG_HEADER: &str = "x-ats-tags";

/// Errors returned by the bounded fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The resource does not exist (local read failed or the repository returned 404).
    #[error("resource '{resource}' not found")]
    NotFound {
        /// URL or path that was requested.
        resource: String,
    },
    /// The repository answered with a non-success status.
    #[error("fetch of '{resource}' failed with status {status}")]
    HttpStatus {
        /// HTTP status code returned by the repository.
        status: u16,
        /// URL that was requested.
        resource: String,
    },
    /// Declared or actual response length exceeded the caller's budget.
    #[error("download failed for '{resource}', length {length} is larger than expected {max_length}")]
    LengthMismatch {
        /// URL that was requested.
        resource: String,
        /// Offending length, as declared by the server or observed on the wire.
        length: i64,
        /// Byte budget supplied by the caller.
        max_length: u64,
    },
    /// The request did not complete within the caller-supplied timeout.
    #[error("fetch of '{resource}' timed out after {timeout:?}")]
    Timeout {
        /// URL that was requested.
        resource: String,
        /// Deadline that expired.
        timeout: Duration,
    },
    /// Networking or TLS errors bubbled up from the HTTP client.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A single bounded fetch: which resource, how many bytes at most, how long to wait.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    /// URL or local filesystem path of the resource.
    pub resource: &'a str,
    /// Upper bound on the response size in bytes.
    pub max_length: u64,
    /// Deadline for the whole request, connection included.
    pub timeout: Duration,
}

/// Fetcher bound to one shared HTTP client and one channel tag.
#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    client: Client,
    tag: String,
}

impl MetadataFetcher {
    /// Binds a fetcher to an HTTP client and a fixed channel tag.
    pub fn new(client: Client, tag: impl Into<String>) -> Self {
        Self {
            client,
            tag: tag.into(),
        }
    }

    /// Returns the tag attached to remote requests.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Retrieves a resource, failing when it exceeds `max_length` bytes.
    ///
    /// Local paths skip the length check: snapshot files already on the device
    /// are not attacker-controlled the way a remote response is. Remote
    /// responses are rejected on the declared `Content-Length` before the body
    /// is consumed, and re-checked while the body streams in, since the
    /// declared value can be absent or forged. Either check firing aborts the
    /// fetch without handing partial data to the caller.
    pub async fn fetch(&self, request: FetchRequest<'_>) -> Result<Vec<u8>, FetchError> {
        if !is_remote(request.resource) {
            return read_local(request.resource);
        }

        let response = self
            .client
            .get(request.resource)
            .header(TAG_HEADER, &self.tag)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|err| classify_transport(err, &request))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                resource: request.resource.to_string(),
            });
        }
        if status != StatusCode::OK {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                resource: request.resource.to_string(),
            });
        }

        if let Some(declared) = declared_length(response.headers()) {
            if declared > request.max_length as i64 {
                return Err(FetchError::LengthMismatch {
                    resource: request.resource.to_string(),
                    length: declared,
                    max_length: request.max_length,
                });
            }
        }

        let mut response = response;
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| classify_transport(err, &request))?
        {
            if (body.len() + chunk.len()) as u64 > request.max_length {
                return Err(FetchError::LengthMismatch {
                    resource: request.resource.to_string(),
                    length: (body.len() + chunk.len()) as i64,
                    max_length: request.max_length,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(
            resource = request.resource,
            bytes = body.len(),
            "fetched resource"
        );
        Ok(body)
    }
}

/// Returns `true` when the resource is fetched over HTTP rather than read from disk.
fn is_remote(resource: &str) -> bool {
    resource.starts_with("http://") || resource.starts_with("https://")
}

/// Reads a local snapshot resource. Any read failure maps to `NotFound`.
fn read_local(resource: &str) -> Result<Vec<u8>, FetchError> {
    fs::read(resource).map_err(|_| FetchError::NotFound {
        resource: resource.to_string(),
    })
}

/// Maps a reqwest error onto the fetch taxonomy, keeping timeouts distinct.
fn classify_transport(err: reqwest::Error, request: &FetchRequest<'_>) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            resource: request.resource.to_string(),
            timeout: request.timeout,
        }
    } else {
        FetchError::Transport(err)
    }
}

/// Parses the declared `Content-Length`, ignoring absent or unparseable values.
///
/// An unparseable header is not trusted either way; the streaming check still
/// bounds the body.
fn declared_length(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<i64>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn fetcher() -> MetadataFetcher {
        MetadataFetcher::new(Client::new(), "main")
    }

    fn request(resource: &str, max_length: u64) -> FetchRequest<'_> {
        FetchRequest {
            resource,
            max_length,
            timeout: Duration::from_secs(5),
        }
    }

    /// Small responses within the budget come back whole, tag header attached.
    #[tokio::test]
    async fn fetch_returns_body_and_sends_tag_header() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method("GET"),
                request::path("/repo/targets.json"),
                request::headers(contains((TAG_HEADER, "main")))
            ])
            .respond_with(status_code(200).body("{\"signed\":{}}")),
        );

        let url = server.url_str("/repo/targets.json");
        let body = fetcher().fetch(request(&url, 1024)).await.unwrap();
        assert_eq!(body, b"{\"signed\":{}}");
    }

    /// A body larger than the budget fails while streaming.
    #[tokio::test]
    async fn fetch_rejects_oversized_body() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![request::method("GET"), request::path("/repo/targets.json")])
                .respond_with(status_code(200).body(vec![b'x'; 200])),
        );

        let url = server.url_str("/repo/targets.json");
        let err = fetcher().fetch(request(&url, 100)).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::LengthMismatch { max_length: 100, .. }
        ));
    }

    /// A declared Content-Length above the budget aborts before any body byte
    /// is consumed: the stub sends headers announcing a huge body and then
    /// stalls, so only the pre-body check can produce this error quickly.
    #[tokio::test]
    async fn fetch_rejects_declared_length_before_body() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 500\r\n\r\n")
                .await
                .unwrap();
            // Keep the connection open without ever sending the body.
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let url = format!("http://{addr}/targets.json");
        let err = fetcher().fetch(request(&url, 100)).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::LengthMismatch {
                length: 500,
                max_length: 100,
                ..
            }
        ));
    }

    /// Non-success statuses map onto the status variant.
    #[tokio::test]
    async fn fetch_maps_server_error_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![request::method("GET"), request::path("/repo/timestamp.json")])
                .respond_with(status_code(500)),
        );

        let url = server.url_str("/repo/timestamp.json");
        let err = fetcher().fetch(request(&url, 1024)).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 500, .. }));
    }

    /// A 404 is reported as NotFound so callers can probe for optional resources.
    #[tokio::test]
    async fn fetch_maps_missing_resource_to_not_found() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![request::method("GET"), request::path("/repo/2.root.json")])
                .respond_with(status_code(404)),
        );

        let url = server.url_str("/repo/2.root.json");
        let err = fetcher().fetch(request(&url, 1024)).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
    }

    /// A server that accepts the connection but never answers trips the timeout.
    #[tokio::test]
    async fn fetch_surfaces_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let url = format!("http://{addr}/root.json");
        let err = fetcher()
            .fetch(FetchRequest {
                resource: &url,
                max_length: 1024,
                timeout: Duration::from_millis(200),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    /// Local snapshot files are read directly and skip the length check.
    #[tokio::test]
    async fn fetch_reads_local_files_without_length_check() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(&path, vec![b'x'; 200]).unwrap();

        let resource = path.to_str().unwrap().to_string();
        let body = fetcher().fetch(request(&resource, 10)).await.unwrap();
        assert_eq!(body.len(), 200);
    }

    /// A missing local file maps to NotFound.
    #[tokio::test]
    async fn fetch_maps_missing_local_file_to_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let resource = dir.path().join("root.json").to_str().unwrap().to_string();
        let err = fetcher().fetch(request(&resource, 10)).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
    }
}
