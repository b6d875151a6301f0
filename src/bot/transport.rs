//! Envelope transport
//!
//! The client only depends on [`EnvelopeTransport`]; [`HttpTransport`]
//! posts JSON over HTTP with a cookie store carrying the bot session.

use super::error::TransportError;
use super::types::{ClientEnvelope, ServerEnvelope};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Posts one envelope and returns the bot's response
#[async_trait]
pub trait EnvelopeTransport: Send + Sync {
    async fn post(
        &self,
        endpoint: &str,
        envelope: &ClientEnvelope,
    ) -> Result<ServerEnvelope, TransportError>;
}

#[async_trait]
impl<T: EnvelopeTransport + ?Sized> EnvelopeTransport for Arc<T> {
    async fn post(
        &self,
        endpoint: &str,
        envelope: &ClientEnvelope,
    ) -> Result<ServerEnvelope, TransportError> {
        (**self).post(endpoint, envelope).await
    }
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EnvelopeTransport for HttpTransport {
    async fn post(
        &self,
        endpoint: &str,
        envelope: &ClientEnvelope,
    ) -> Result<ServerEnvelope, TransportError> {
        let response = self
            .client
            .post(endpoint)
            .header(ACCEPT, "application/json")
            .json(envelope)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::status(
                status.as_u16(),
                format!("HTTP {status}: {body}"),
            ));
        }

        serde_json::from_str(&body)
            .map_err(|e| TransportError::decode(format!("Invalid envelope: {e}")))
    }
}

/// Logs every envelope round trip
pub struct LoggingTransport<T> {
    inner: T,
}

impl<T: EnvelopeTransport> LoggingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: EnvelopeTransport> EnvelopeTransport for LoggingTransport<T> {
    async fn post(
        &self,
        endpoint: &str,
        envelope: &ClientEnvelope,
    ) -> Result<ServerEnvelope, TransportError> {
        let start = std::time::Instant::now();
        let result = self.inner.post(endpoint, envelope).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    endpoint,
                    client_id = %envelope.client_id,
                    duration_ms = %duration.as_millis(),
                    entries = response.entries.len(),
                    "Envelope posted"
                );
            }
            Err(e) => {
                tracing::error!(
                    endpoint,
                    client_id = %envelope.client_id,
                    duration_ms = %duration.as_millis(),
                    kind = ?e.kind,
                    error = %e.message,
                    "Envelope post failed"
                );
            }
        }

        result
    }
}
