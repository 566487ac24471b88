//! Authentication
//!
//! Exchanges a username and password for a session token with
//! `GET /login?using-cookies` and persists it through the [`TokenStore`].
//! When built with credentials, the controller doubles as the session's
//! [`Reauthenticator`].

use crate::controlplane::session::{AUTH_TOKEN_HEADER, CLIENT_HEADER, CLIENT_HEADER_VALUE};
use crate::domain::ports::{BasicAuth, HttpRequest, Reauthenticator, TokenStoreRef, TransportRef};
use crate::domain::types::{Credentials, Endpoint, SessionToken};
use crate::error::{Error, HttpFailure, Result};
use async_trait::async_trait;
use reqwest::Method;
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "/login?using-cookies";
pub const LOGOUT_PATH: &str = "/logout";

/// Obtains, persists and discards session tokens
pub struct AuthController {
    endpoint: Endpoint,
    transport: TransportRef,
    tokens: TokenStoreRef,
    credentials: Option<Credentials>,
}

impl AuthController {
    pub fn new(endpoint: Endpoint, transport: TransportRef, tokens: TokenStoreRef) -> Self {
        Self {
            endpoint,
            transport,
            tokens,
            credentials: None,
        }
    }

    /// Keep credentials so the controller can re-login on expiry
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Log in and return a human-readable confirmation
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<String> {
        self.login(credentials).await?;
        Ok(format!(
            "User {} authenticated successfully against {}",
            credentials.username, self.endpoint
        ))
    }

    /// Log in and persist the resulting token
    pub async fn login(&self, credentials: &Credentials) -> Result<SessionToken> {
        if credentials.username.is_empty() {
            return Err(Error::BadInput("username must not be empty".into()));
        }

        let mut request = HttpRequest::new(Method::GET, self.endpoint.url(LOGIN_PATH))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header(CLIENT_HEADER, CLIENT_HEADER_VALUE);
        request.basic_auth = Some(BasicAuth {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        });

        debug!("Logging in to {} as {}", self.endpoint, credentials.username);
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            let failure = HttpFailure::from_body(response.status, &response.reason, &response.body);
            return Err(Error::from_http(failure)
                .context(format!("login as {}", credentials.username)));
        }

        let token = response
            .header(AUTH_TOKEN_HEADER)
            .map(str::to_string)
            .or_else(|| token_from_body(&response.body))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Internal("login response carried no session token".into()))?;

        let token = SessionToken::new(token);
        self.tokens.save(&credentials.username, &token).await?;
        info!("Authenticated {} against {}", credentials.username, self.endpoint);
        Ok(token)
    }

    /// Invalidate the current token on the Controller and forget it locally
    pub async fn logout(&self) -> Result<()> {
        let token = match self.tokens.load().await {
            Ok(token) => token,
            Err(_) => {
                debug!("No stored session token, nothing to log out");
                return self.tokens.clear().await;
            }
        };

        let request = HttpRequest::new(Method::GET, self.endpoint.url(LOGOUT_PATH))
            .header("Accept", "application/json")
            .header(CLIENT_HEADER, CLIENT_HEADER_VALUE)
            .header(AUTH_TOKEN_HEADER, token.as_str());

        match self.transport.execute(request).await {
            Ok(response) if response.is_success() => info!("Logged out of {}", self.endpoint),
            Ok(response) => warn!(
                "Logout answered HTTP {} {}; clearing local token anyway",
                response.status, response.reason
            ),
            Err(e) => {
                self.tokens.clear().await?;
                return Err(e.context("logout"));
            }
        }

        self.tokens.clear().await
    }
}

#[async_trait]
impl Reauthenticator for AuthController {
    async fn reauthenticate(&self) -> Result<SessionToken> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            Error::BadInput("no credentials available for re-authentication".into())
        })?;
        self.login(credentials).await
    }
}

/// Some deployments return the token as a bare JSON string body
fn token_from_body(body: &[u8]) -> Option<String> {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::String(s)) => Some(s),
        _ => None,
    }
}
