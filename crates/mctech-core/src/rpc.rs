// crates/mctech-core/src/rpc.rs
// ============================================================================
// Module: HTTP RPC Client
// Description: Shared blocking HTTP client with bounded retry.
// Purpose: Back the DW selector, sequence and crypto services.
// Dependencies: reqwest, url, thiserror
// ============================================================================

//! ## Overview
//! Every infrastructure call goes through [`RpcClient::get`] or
//! [`RpcClient::post`]. The client keeps
//! idle connections for one second and retries a failed call up to three
//! times. A response with status `>= 400` counts as a failure and carries the
//! status and body in its message.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::blocking::RequestBuilder;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Attempts made per call.
pub const RPC_RETRY_COUNT: usize = 3;
/// Idle connection lifetime.
const RPC_IDLE_TIMEOUT: Duration = Duration::from_secs(1);
/// Per-request timeout.
const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum accepted response size in bytes.
const RPC_MAX_RESPONSE_BYTES: u64 = 4 * 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// RPC failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Client could not be constructed.
    #[error("rpc client build failed: {0}")]
    Build(String),
    /// URL could not be composed.
    #[error("rpc url invalid: {0}")]
    Url(String),
    /// Transport failure.
    #[error("rpc transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status.
    #[error("code: {status} >> {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },
    /// Every retry failed.
    #[error("rpc call failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: usize,
        /// Last error observed.
        last: String,
    },
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Blocking HTTP client shared by infrastructure lookups.
#[derive(Clone)]
pub struct RpcClient {
    /// Underlying reqwest client.
    client: Client,
}

impl RpcClient {
    /// Builds a client with the shared idle timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Build`] when the TLS backend cannot initialize.
    pub fn new() -> Result<Self, RpcError> {
        let client = Client::builder()
            .pool_idle_timeout(RPC_IDLE_TIMEOUT)
            .timeout(RPC_REQUEST_TIMEOUT)
            .build()
            .map_err(|err| RpcError::Build(err.to_string()))?;
        Ok(Self {
            client,
        })
    }

    /// Issues a GET with retry and returns the body bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Exhausted`] when every attempt failed.
    pub fn get(&self, url: &Url, headers: &[(&str, &str)]) -> Result<Vec<u8>, RpcError> {
        Self::with_retry(|| Self::send_once(self.client.get(url.clone()), headers))
    }

    /// Issues a POST with a JSON body (empty when `None`) with retry.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Exhausted`] when every attempt failed.
    pub fn post(&self, url: &Url, body: Option<&str>) -> Result<Vec<u8>, RpcError> {
        Self::with_retry(|| {
            let mut request = self.client.post(url.clone());
            if let Some(body) = body {
                request = request.header("Content-Type", "application/json").body(body.to_string());
            }
            Self::send_once(request, &[])
        })
    }

    /// Runs `call` up to [`RPC_RETRY_COUNT`] times.
    fn with_retry(call: impl Fn() -> Result<Vec<u8>, RpcError>) -> Result<Vec<u8>, RpcError> {
        let mut last = String::new();
        for _ in 0 .. RPC_RETRY_COUNT {
            match call() {
                Ok(body) => return Ok(body),
                Err(err) => last = err.to_string(),
            }
        }
        Err(RpcError::Exhausted {
            attempts: RPC_RETRY_COUNT,
            last,
        })
    }

    /// Sends one request.
    fn send_once(mut request: RequestBuilder, headers: &[(&str, &str)]) -> Result<Vec<u8>, RpcError> {
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().map_err(|err| RpcError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let mut body = Vec::new();
        response
            .take(RPC_MAX_RESPONSE_BYTES)
            .read_to_end(&mut body)
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        if status >= 400 {
            return Err(RpcError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }
}

/// Joins a path with query parameters onto an API prefix.
///
/// # Errors
///
/// Returns [`RpcError::Url`] when the prefix or path is not a valid URL.
pub fn api_url(prefix: &str, path: &str, query: &[(&str, &str)]) -> Result<Url, RpcError> {
    let base = Url::parse(prefix).map_err(|err| RpcError::Url(err.to_string()))?;
    let mut url = base.join(path).map_err(|err| RpcError::Url(err.to_string()))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter().copied());
    }
    Ok(url)
}
