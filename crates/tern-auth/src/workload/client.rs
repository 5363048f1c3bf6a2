// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! HTTP/1.1 client for the workload API.
//!
//! Each request opens a fresh connection (TCP or Unix socket), runs a single
//! hyper exchange over it and closes it once the body has been read.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use tern_core::signature::encode_uri_component_strict;
use tern_core::{HubError, HubResult};

/// API version sent with every workload request.
pub const WORKLOAD_API_VERSION: &str = "2018-06-28";

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest response body accepted from the workload API.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

// =============================================================================
// WorkloadEndpoint
// =============================================================================

/// Where the workload API listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadEndpoint {
    /// `http://host:port`
    Tcp {
        /// Host name or address.
        host: String,
        /// Port.
        port: u16,
    },
    /// `unix:///path/to/socket`
    Unix(PathBuf),
}

impl WorkloadEndpoint {
    /// Parses a workload URI.
    pub fn parse(uri: &str) -> HubResult<Self> {
        let uri = uri.trim();

        if let Some(path) = uri.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(HubError::validation("workload_uri", "unix socket path is empty"));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        if let Some(authority) = uri.strip_prefix("http://") {
            let authority = authority.trim_end_matches('/');
            let (host, port) = authority.rsplit_once(':').ok_or_else(|| {
                HubError::validation("workload_uri", format!("'{}' has no port", uri))
            })?;
            let port = port.parse::<u16>().map_err(|_| {
                HubError::validation("workload_uri", format!("'{}' has an invalid port", uri))
            })?;
            if host.is_empty() {
                return Err(HubError::validation("workload_uri", format!("'{}' has no host", uri)));
            }
            return Ok(Self::Tcp {
                host: host.to_string(),
                port,
            });
        }

        Err(HubError::validation(
            "workload_uri",
            format!("unsupported workload URI scheme in '{}'", uri),
        ))
    }

    fn host_header(&self) -> String {
        match self {
            Self::Tcp { host, port } => format!("{}:{}", host, port),
            Self::Unix(_) => "localhost".to_string(),
        }
    }
}

impl fmt::Display for WorkloadEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "http://{}:{}", host, port),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    #[serde(rename = "keyId")]
    key_id: &'a str,
    algo: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    digest: String,
}

#[derive(Debug, Deserialize)]
struct TrustBundleResponse {
    certificate: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
struct HttpResponse {
    status: u16,
    body: Vec<u8>,
}

// =============================================================================
// WorkloadClient
// =============================================================================

/// Client for the workload API.
#[derive(Debug, Clone)]
pub struct WorkloadClient {
    endpoint: WorkloadEndpoint,
    request_timeout: Duration,
}

impl WorkloadClient {
    /// Creates a client for `workload_uri`.
    pub fn new(workload_uri: &str) -> HubResult<Self> {
        Ok(Self {
            endpoint: WorkloadEndpoint::parse(workload_uri)?,
            request_timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Returns the endpoint.
    pub fn endpoint(&self) -> &WorkloadEndpoint {
        &self.endpoint
    }

    /// Signs `data` with the module's primary key and returns the base64 digest.
    pub async fn sign(&self, module_id: &str, generation_id: &str, data: &str) -> HubResult<String> {
        let path = format!(
            "/modules/{}/genid/{}/sign?api-version={}",
            encode_uri_component_strict(module_id),
            encode_uri_component_strict(generation_id),
            WORKLOAD_API_VERSION
        );
        let body = serde_json::to_vec(&SignRequest {
            key_id: "primary",
            algo: "HMACSHA256",
            data: STANDARD.encode(data.as_bytes()),
        })
        .map_err(|e| HubError::signing(format!("failed to encode sign request: {}", e)))?;

        let response = self.request(Method::POST, &path, Some(body)).await?;
        let parsed: SignResponse = serde_json::from_slice(&response.body)
            .map_err(|e| HubError::signing(format!("malformed sign response: {}", e)))?;

        debug!(endpoint = %self.endpoint, module = module_id, "Workload signed token");
        Ok(parsed.digest)
    }

    /// Fetches the PEM trust bundle of the edge runtime.
    pub async fn trust_bundle(&self) -> HubResult<String> {
        let path = format!("/trust-bundle?api-version={}", WORKLOAD_API_VERSION);
        let response = self.request(Method::GET, &path, None).await?;
        let parsed: TrustBundleResponse = serde_json::from_slice(&response.body)
            .map_err(|e| HubError::format(format!("malformed trust bundle response: {}", e)))?;
        Ok(parsed.certificate)
    }

    async fn request(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> HubResult<HttpResponse> {
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(path)
            .header(HOST, self.endpoint.host_header());
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| HubError::format(format!("invalid workload request: {}", e)))?;

        trace!(endpoint = %self.endpoint, %method, path, "Workload request");

        let response = timeout(self.request_timeout, self.exchange(request))
            .await
            .map_err(|_| HubError::timeout(self.request_timeout))??;

        if !(200..300).contains(&response.status) {
            return Err(status_error(response.status, &response.body));
        }
        Ok(response)
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> HubResult<HttpResponse> {
        match &self.endpoint {
            WorkloadEndpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await.map_err(|e| {
                    HubError::network(format!("workload connect to {} failed: {}", self.endpoint, e))
                })?;
                send_request(stream, request).await
            }
            #[cfg(unix)]
            WorkloadEndpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await.map_err(|e| {
                    HubError::network(format!("workload connect to {} failed: {}", self.endpoint, e))
                })?;
                send_request(stream, request).await
            }
            #[cfg(not(unix))]
            WorkloadEndpoint::Unix(_) => Err(HubError::validation(
                "workload_uri",
                "unix sockets are not supported on this platform",
            )),
        }
    }
}

/// Runs one HTTP/1.1 exchange over `stream`. The connection is closed once
/// the body is read.
async fn send_request<S>(stream: S, request: Request<Full<Bytes>>) -> HubResult<HttpResponse>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| HubError::network(format!("workload handshake failed: {}", e)))?;

    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "Workload connection closed with error");
        }
    });

    let result = read_response(&mut sender, request).await;
    driver.abort();
    result
}

async fn read_response(
    sender: &mut http1::SendRequest<Full<Bytes>>,
    request: Request<Full<Bytes>>,
) -> HubResult<HttpResponse> {
    let response = sender
        .send_request(request)
        .await
        .map_err(|e| HubError::network(format!("workload request failed: {}", e)))?;
    let status = response.status().as_u16();

    let body = Limited::new(response.into_body(), MAX_RESPONSE_BYTES)
        .collect()
        .await
        .map_err(|e| HubError::format(format!("failed to read workload response: {}", e)))?
        .to_bytes();

    Ok(HttpResponse {
        status,
        body: body.to_vec(),
    })
}

fn status_error(status: u16, body: &[u8]) -> HubError {
    let message = serde_json::from_slice::<ErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    let message = format!("workload API returned {}: {}", status, message);

    match status {
        400 => HubError::validation("workload_request", message),
        401 | 403 => HubError::unauthorized(message),
        404 => HubError::not_found(message),
        429 => HubError::throttled(message),
        500..=599 => HubError::service_unavailable(message),
        _ => HubError::format(message),
    }
}

// =============================================================================
// Tests
// =============================================================================
