//! Mock implementations for testing
//!
//! These mocks enable testing the client and provider without real I/O.

use super::error::TransportError;
use super::transport::EnvelopeTransport;
use super::types::{ClientEnvelope, ServerEnvelope};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

// ============================================================================
// Mock Transport
// ============================================================================

/// Mock transport that returns queued responses
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<ServerEnvelope, TransportError>>>,
    /// Record of all envelopes posted
    requests: Mutex<Vec<(String, ClientEnvelope)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: ServerEnvelope) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue a response holding the given raw entries
    pub fn queue_entries(&self, entries: Vec<Value>) {
        let entries = entries
            .into_iter()
            .map(|e| serde_json::from_value(e).expect("valid test entry"))
            .collect();
        self.queue_response(ServerEnvelope {
            entries,
            ..Default::default()
        });
    }

    /// Queue an error response
    pub fn queue_error(&self, error: TransportError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Envelopes posted so far
    pub fn requests(&self) -> Vec<ClientEnvelope> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }
}

#[async_trait]
impl EnvelopeTransport for MockTransport {
    async fn post(
        &self,
        endpoint: &str,
        envelope: &ClientEnvelope,
    ) -> Result<ServerEnvelope, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.to_string(), envelope.clone()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::network("No mock response queued")))
    }
}
