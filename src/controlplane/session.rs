//! Controller Session
//!
//! Authenticated JSON requests against the Controller. Every call carries the
//! client identification header and the session token read from the
//! injected [`TokenStore`]. Non-2xx answers are classified into the error
//! taxonomy. When a [`Reauthenticator`] is attached, a request rejected with
//! 401/403 triggers exactly one re-login and one retry.

use crate::domain::ports::{HttpRequest, ReauthenticatorRef, TokenStoreRef, TransportRef};
use crate::domain::types::{Endpoint, SessionToken};
use crate::error::{Error, ErrorKind, HttpFailure, Result};
use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

// =============================================================================
// Wire Constants
// =============================================================================

/// Header carrying the session token
pub const AUTH_TOKEN_HEADER: &str = "X-SDS-AUTH-TOKEN";
/// Client identification header and its fixed value
pub const CLIENT_HEADER: &str = "X-EMC-REST-CLIENT";
pub const CLIENT_HEADER_VALUE: &str = "TRUE";

/// Media types the Controller speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    Json,
    Xml,
    OctetStream,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::Xml => "application/xml",
            MediaType::OctetStream => "application/octet-stream",
        }
    }
}

// =============================================================================
// Request Options & Response
// =============================================================================

/// Per-request knobs
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub accept: MediaType,
    pub content_type: MediaType,
    /// Extra headers appended after the standard ones
    pub headers: Vec<(String, String)>,
    /// Stream a successful body to this file instead of memory
    pub file_sink: Option<PathBuf>,
}

impl RequestOptions {
    pub fn accept(mut self, accept: MediaType) -> Self {
        self.accept = accept;
        self
    }

    pub fn file_sink(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_sink = Some(path.into());
        self
    }
}

/// Successful Controller answer
#[derive(Debug, Clone)]
pub struct ControllerResponse {
    pub status: u16,
    /// Header names lowercased
    pub headers: BTreeMap<String, String>,
    /// Empty when the body went to a file sink
    pub payload: Bytes,
}

impl ControllerResponse {
    /// Decode the payload as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).to_string()
    }
}

// =============================================================================
// Controller Session
// =============================================================================

/// Authenticated access to the Controller REST API
pub struct ControllerSession {
    endpoint: Endpoint,
    transport: TransportRef,
    tokens: TokenStoreRef,
    reauth: Option<ReauthenticatorRef>,
}

impl ControllerSession {
    /// Create a session that surfaces auth errors unchanged
    pub fn new(endpoint: Endpoint, transport: TransportRef, tokens: TokenStoreRef) -> Self {
        Self {
            endpoint,
            transport,
            tokens,
            reauth: None,
        }
    }

    /// Allow one transparent re-login on 401/403
    pub fn with_reauthenticator(mut self, reauth: ReauthenticatorRef) -> Self {
        self.reauth = Some(reauth);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Perform an authenticated request.
    ///
    /// On 2xx returns the body and headers. On a 401/403 with a
    /// reauthenticator attached, logs in again and retries once; if the
    /// re-login or the retry fails, the original error is returned.
    pub async fn json_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<ControllerResponse> {
        let token = self.current_token().await?;

        let first = self.send(method.clone(), path, body, options, &token).await;
        let original = match first {
            Err(err) if err.is_auth_failure() => err,
            other => return other,
        };

        let reauth = match &self.reauth {
            Some(reauth) => reauth,
            None => return Err(original),
        };

        warn!("{} {} rejected ({}), re-authenticating", method, path, original.kind());
        let fresh = match reauth.reauthenticate().await {
            Ok(token) => token,
            Err(e) => {
                warn!("Re-authentication failed: {}", e);
                return Err(original);
            }
        };

        match self.send(method, path, body, options, &fresh).await {
            Err(retry) => {
                warn!("Retry after re-authentication failed: {}", retry);
                Err(original)
            }
            ok => ok,
        }
    }

    /// GET and decode JSON
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.json_request(Method::GET, path, None, &RequestOptions::default())
            .await?
            .json()
    }

    /// POST a JSON body
    pub async fn post(&self, path: &str, body: &Value) -> Result<ControllerResponse> {
        self.json_request(Method::POST, path, Some(body), &RequestOptions::default())
            .await
    }

    /// Token for the next request, logging in first when none is stored
    async fn current_token(&self) -> Result<SessionToken> {
        match self.tokens.load().await {
            Ok(token) => Ok(token),
            Err(e) if e.kind() == ErrorKind::NotFound => match &self.reauth {
                Some(reauth) => {
                    debug!("No stored session token, logging in");
                    reauth.reauthenticate().await
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
        token: &SessionToken,
    ) -> Result<HttpRequest> {
        let mut request = HttpRequest::new(method, self.endpoint.url(path))
            .header("Content-Type", options.content_type.as_str())
            .header("Accept", options.accept.as_str())
            .header(CLIENT_HEADER, CLIENT_HEADER_VALUE)
            .header(AUTH_TOKEN_HEADER, token.as_str());
        request.headers.extend(options.headers.iter().cloned());
        if let Some(body) = body {
            request.body = Some(serde_json::to_vec(body)?);
        }
        Ok(request)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
        token: &SessionToken,
    ) -> Result<ControllerResponse> {
        debug!("{} {}", method, path);
        let request = self.build_request(method, path, body, options, token)?;

        let response = match &options.file_sink {
            Some(sink) => self.transport.execute_to_file(request, sink).await?,
            None => self.transport.execute(request).await?,
        };

        if !response.is_success() {
            let failure = HttpFailure::from_body(response.status, &response.reason, &response.body);
            debug!("{} answered {}", path, failure);
            return Err(Error::from_http(failure));
        }

        Ok(ControllerResponse {
            status: response.status,
            headers: response.headers,
            payload: response.body,
        })
    }
}

impl std::fmt::Debug for ControllerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerSession")
            .field("endpoint", &self.endpoint)
            .field("reauth", &self.reauth.is_some())
            .finish()
    }
}
