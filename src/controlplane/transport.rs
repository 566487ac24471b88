//! HTTPS Transport
//!
//! `reqwest`-backed implementation of the [`Transport`] port. One client is
//! built per transport and its connection pool is reused across calls.

use crate::domain::ports::{HttpRequest, HttpResponse, Transport};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the HTTPS transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Verify the Controller certificate chain
    pub verify_tls: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            timeout: Duration::from_secs(20),
        }
    }
}

// =============================================================================
// Reqwest Transport
// =============================================================================

/// Transport speaking HTTPS through a pooled `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a new transport
    pub fn new(config: TransportConfig) -> Result<Self> {
        if !config.verify_tls {
            warn!("TLS certificate verification is disabled for Controller connections");
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .redirect(Policy::none())
            .build()?;

        Ok(Self { client })
    }

    /// Translate a port-level request into a `reqwest::Request`
    fn build(&self, request: HttpRequest) -> Result<reqwest::Request> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = &request.basic_auth {
            builder = builder.basic_auth(&auth.username, Some(&auth.password));
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        Ok(builder.build()?)
    }

    fn status_and_headers(response: &reqwest::Response) -> (u16, String, BTreeMap<String, String>) {
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        (
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown").to_string(),
            headers,
        )
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = self.build(request)?;
        debug!("{} {}", request.method(), request.url().path());

        let response = self.client.execute(request).await?;
        let (status, reason, headers) = Self::status_and_headers(&response);
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            reason,
            headers,
            body,
        })
    }

    async fn execute_to_file(&self, request: HttpRequest, sink: &Path) -> Result<HttpResponse> {
        let request = self.build(request)?;
        debug!("{} {} -> {}", request.method(), request.url().path(), sink.display());

        let mut response = self.client.execute(request).await?;
        let (status, reason, headers) = Self::status_and_headers(&response);

        if !response.status().is_success() {
            let body = response.bytes().await?;
            return Ok(HttpResponse {
                status,
                reason,
                headers,
                body,
            });
        }

        let mut file = tokio::fs::File::create(sink).await?;
        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;
        debug!("Wrote {} bytes to {}", written, sink.display());

        Ok(HttpResponse {
            status,
            reason,
            headers,
            body: Bytes::new(),
        })
    }
}
