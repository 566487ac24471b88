//! Domain Ports - Core trait definitions for the volume agent
//!
//! These traits define the boundaries between the attach/detach logic and
//! external systems: the Controller's HTTPS API, the token persistence
//! layout, credential owners, and local process execution. Adapters
//! implement these traits to provide concrete functionality.

use crate::domain::types::SessionToken;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Chunk size used when spilling a response body to a file sink
pub const SINK_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// HTTP Transport
// =============================================================================

/// Basic-auth pair attached to a single request
#[derive(Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A fully-formed request ready to go on the wire
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Header names as sent
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub basic_auth: Option<BasicAuth>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            basic_auth: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response as seen by the session, independent of the HTTP library
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    /// Header names lowercased
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Port for sending requests to the Controller
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and buffer the whole response
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Send a request and stream a successful body into `sink`.
    ///
    /// The returned response carries an empty body when the payload was
    /// written to the sink. Non-2xx bodies are returned in memory so they can
    /// be classified.
    async fn execute_to_file(&self, request: HttpRequest, sink: &Path) -> Result<HttpResponse> {
        let mut response = self.execute(request).await?;
        if !response.is_success() {
            return Ok(response);
        }

        let mut file = tokio::fs::File::create(sink).await?;
        for chunk in response.body.chunks(SINK_CHUNK_SIZE) {
            file.write_all(chunk).await?;
        }
        file.flush().await?;
        response.body = Bytes::new();
        Ok(response)
    }
}

// =============================================================================
// Token Store
// =============================================================================

/// Port for persisting the session token between invocations
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current token; `Error::TokenNotFound` when none is available
    async fn load(&self) -> Result<SessionToken>;

    /// Replace the stored token for `username`
    async fn save(&self, username: &str, token: &SessionToken) -> Result<()>;

    /// Forget the stored token
    async fn clear(&self) -> Result<()>;
}

// =============================================================================
// Re-authentication
// =============================================================================

/// Capability held by whoever owns the credentials
#[async_trait]
pub trait Reauthenticator: Send + Sync {
    /// Obtain a fresh token, persisting it before returning
    async fn reauthenticate(&self) -> Result<SessionToken>;
}

// =============================================================================
// Command Execution
// =============================================================================

/// Captured result of a local command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Port for executing local helpers
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, elevating when `as_root` is set
    async fn run(&self, program: &str, args: &[&str], as_root: bool) -> Result<CommandOutput>;
}

/// Turn a failed command into an error
pub fn command_failure(command: &str, output: &CommandOutput) -> Error {
    let reason = match output.exit_code {
        Some(code) => format!("exit code {}: {}", code, output.stderr.trim()),
        None => format!("terminated by signal: {}", output.stderr.trim()),
    };
    Error::Command {
        command: command.to_string(),
        reason,
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type TransportRef = Arc<dyn Transport>;
pub type TokenStoreRef = Arc<dyn TokenStore>;
pub type ReauthenticatorRef = Arc<dyn Reauthenticator>;
pub type CommandRunnerRef = Arc<dyn CommandRunner>;
