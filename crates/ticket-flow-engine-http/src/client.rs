// crates/ticket-flow-engine-http/src/client.rs
// ============================================================================
// Module: HTTP DAG Engine Client
// Description: Blocking REST client implementing the DagEngine contract.
// Purpose: Submit pipelines and drive engine roots over HTTP.
// Dependencies: ticket-flow-core, reqwest, serde, serde_json, thiserror, tracing, url
// ============================================================================

//! ## Overview
//! REST mapping, relative to the configured base URL:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | submit | `POST /pipelines` |
//! | tree state | `GET /pipelines/{root}/tree` |
//! | revoke | `POST /pipelines/{root}/revoke` |
//! | node ops | `POST /pipelines/{root}/nodes/{node}/{retry,skip,force_fail,callback}` |
//! | node logs | `GET /pipelines/{root}/nodes/{node}/logs` |
//!
//! Invariants:
//! - Transport failures surface as [`EngineError::Unreachable`].
//! - `404` surfaces as [`EngineError::NotFound`]; other non-2xx as
//!   [`EngineError::Rejected`].
//! - Unreadable or oversized bodies surface as [`EngineError::Protocol`].
//! - Redirects are not followed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::blocking::RequestBuilder;
use reqwest::blocking::Response;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use ticket_flow_core::DagEngine;
use ticket_flow_core::EngineError;
use ticket_flow_core::NodeId;
use ticket_flow_core::PipelineSpec;
use ticket_flow_core::RootHandle;
use ticket_flow_core::TreeState;
use tracing::debug;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default request timeout in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
/// Default maximum response body size in bytes.
const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;
/// Maximum bytes of an error body echoed into an error message.
const MAX_ERROR_SNIPPET: usize = 256;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for [`HttpDagEngine`].
///
/// # Invariants
/// - `base_url` uses the `http` or `https` scheme.
/// - `timeout_ms` applies to the full request lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpEngineConfig {
    /// Engine base URL, e.g. `http://dag-engine:8080/api`.
    pub base_url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// User agent sent on every request.
    pub user_agent: String,
    /// Maximum accepted response body size in bytes.
    pub max_response_bytes: usize,
}

impl Default for HttpEngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            user_agent: "ticket-flow/0.1".to_string(),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl HttpEngineConfig {
    /// Parses and checks the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`HttpEngineError::InvalidConfig`] when a field is out of range.
    pub fn parsed_base_url(&self) -> Result<Url, HttpEngineError> {
        let url = Url::parse(&self.base_url)
            .map_err(|err| HttpEngineError::InvalidConfig(format!("base_url: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HttpEngineError::InvalidConfig(format!(
                "base_url scheme must be http or https, got {}",
                url.scheme()
            )));
        }
        if url.cannot_be_a_base() || url.query().is_some() || url.fragment().is_some() {
            return Err(HttpEngineError::InvalidConfig(
                "base_url must be a plain base URL".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(HttpEngineError::InvalidConfig(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_response_bytes == 0 {
            return Err(HttpEngineError::InvalidConfig(
                "max_response_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(url)
    }
}

/// Errors raised while constructing the client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpEngineError {
    /// Configuration is invalid.
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
    /// HTTP client construction failed.
    #[error("engine http client error: {0}")]
    Client(String),
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Submission body.
#[derive(Serialize)]
struct SubmitRequest<'a> {
    /// Pipeline tree.
    pipeline: &'a PipelineSpec,
    /// Sibling ordering edges.
    edges: Vec<(NodeId, NodeId)>,
}

/// Submission reply.
#[derive(Deserialize)]
struct SubmitResponse {
    /// Assigned root handle.
    root: RootHandle,
}

/// Revoke reply.
#[derive(Deserialize)]
struct RevokeResponse {
    /// Whether the engine confirmed cancellation.
    revoked: bool,
}

/// Node log reply.
#[derive(Deserialize)]
struct LogsResponse {
    /// Log lines in emission order.
    lines: Vec<String>,
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Blocking HTTP implementation of [`DagEngine`].
#[derive(Debug, Clone)]
pub struct HttpDagEngine {
    /// Parsed base URL.
    base: Url,
    /// Response size cap.
    max_response_bytes: usize,
    /// HTTP client.
    client: Client,
}

impl HttpDagEngine {
    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HttpEngineError`] when the configuration is invalid or the
    /// client cannot be built.
    pub fn new(config: &HttpEngineConfig) -> Result<Self, HttpEngineError> {
        let base = config.parsed_base_url()?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .build()
            .map_err(|err| HttpEngineError::Client(err.to_string()))?;
        Ok(Self {
            base,
            max_response_bytes: config.max_response_bytes,
            client,
        })
    }

    /// Returns the base URL requests are resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Builds `{base}/pipelines/...segments`, escaping each segment.
    fn url(&self, segments: &[&str]) -> Result<Url, EngineError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| EngineError::Protocol("base url cannot hold a path".to_string()))?;
            path.pop_if_empty().push("pipelines");
            path.extend(segments);
        }
        Ok(url)
    }

    /// Node endpoint for `action` on `node` under `root`.
    fn node_url(&self, root: &RootHandle, node: &NodeId, action: &str) -> Result<Url, EngineError> {
        self.url(&[root.as_str(), "nodes", node.as_str(), action])
    }

    /// Sends a request and returns the body of a successful response.
    fn send(&self, request: RequestBuilder, target: &Url) -> Result<Vec<u8>, EngineError> {
        debug!(url = %target, "dag engine request");
        let response =
            request.send().map_err(|err| EngineError::Unreachable(format!("{target}: {err}")))?;
        let status = response.status();
        let body = read_limited(response, self.max_response_bytes)?;
        if status.is_success() {
            return Ok(body);
        }
        let snippet = error_snippet(&body);
        if status == StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(format!("{target}: {snippet}")));
        }
        Err(EngineError::Rejected(format!("{target}: http {status}: {snippet}")))
    }

    /// GETs a JSON document.
    fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, EngineError> {
        let body = self.send(self.client.get(url.clone()), url)?;
        decode(&body)
    }

    /// POSTs a JSON body and returns the raw reply body.
    fn post<B: Serialize + ?Sized>(&self, url: &Url, body: &B) -> Result<Vec<u8>, EngineError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|err| EngineError::Protocol(format!("encode request: {err}")))?;
        let request =
            self.client.post(url.clone()).header(CONTENT_TYPE, "application/json").body(bytes);
        self.send(request, url)
    }
}

impl DagEngine for HttpDagEngine {
    fn submit(&self, pipeline: &PipelineSpec) -> Result<RootHandle, EngineError> {
        let url = self.url(&[])?;
        let body = self.post(&url, &SubmitRequest {
            pipeline,
            edges: pipeline.edges(),
        })?;
        let reply: SubmitResponse = decode(&body)?;
        debug!(root = %reply.root, pipeline = %pipeline.id, "pipeline submitted");
        Ok(reply.root)
    }

    fn tree_state(&self, root: &RootHandle) -> Result<TreeState, EngineError> {
        let tree: TreeState = self.get_json(&self.url(&[root.as_str(), "tree"])?)?;
        if &tree.root != root {
            return Err(EngineError::Protocol(format!(
                "tree for {root} reported root {}",
                tree.root
            )));
        }
        Ok(tree)
    }

    fn revoke(&self, root: &RootHandle) -> Result<bool, EngineError> {
        let body = self.post(&self.url(&[root.as_str(), "revoke"])?, &Value::Null)?;
        let reply: RevokeResponse = decode(&body)?;
        Ok(reply.revoked)
    }

    fn retry_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError> {
        self.post(&self.node_url(root, node, "retry")?, &Value::Null).map(drop)
    }

    fn skip_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError> {
        self.post(&self.node_url(root, node, "skip")?, &Value::Null).map(drop)
    }

    fn force_fail_node(&self, root: &RootHandle, node: &NodeId) -> Result<(), EngineError> {
        self.post(&self.node_url(root, node, "force_fail")?, &Value::Null).map(drop)
    }

    fn callback_node(
        &self,
        root: &RootHandle,
        node: &NodeId,
        payload: &Value,
    ) -> Result<(), EngineError> {
        self.post(&self.node_url(root, node, "callback")?, payload).map(drop)
    }

    fn node_logs(&self, root: &RootHandle, node: &NodeId) -> Result<Vec<String>, EngineError> {
        let reply: LogsResponse = self.get_json(&self.node_url(root, node, "logs")?)?;
        Ok(reply.lines)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads the response body while enforcing a byte limit.
fn read_limited(response: Response, max_bytes: usize) -> Result<Vec<u8>, EngineError> {
    let max_bytes_u64 = u64::try_from(max_bytes)
        .map_err(|_| EngineError::Protocol("response size limit exceeds u64".to_string()))?;
    if let Some(expected) = response.content_length()
        && expected > max_bytes_u64
    {
        return Err(EngineError::Protocol(format!(
            "response of {expected} bytes exceeds limit of {max_bytes}"
        )));
    }
    let mut body = Vec::new();
    response
        .take(max_bytes_u64.saturating_add(1))
        .read_to_end(&mut body)
        .map_err(|err| EngineError::Protocol(format!("read response: {err}")))?;
    if body.len() > max_bytes {
        return Err(EngineError::Protocol(format!("response exceeds limit of {max_bytes} bytes")));
    }
    Ok(body)
}

/// Decodes a JSON reply.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, EngineError> {
    serde_json::from_slice(body).map_err(|err| EngineError::Protocol(format!("decode reply: {err}")))
}

/// Returns a printable prefix of an error body.
fn error_snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "empty body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_SNIPPET).collect()
}
