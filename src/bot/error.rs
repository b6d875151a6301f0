//! Transport error types

use thiserror::Error;

/// Shown when the bot could not be reached
pub const LOST_CONNECTION_MESSAGE: &str = "Lost connection... Please try again.";
/// Shown for every other failure
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong";

/// Transport error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Status(status), message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Decode, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Unknown, message)
    }

    /// Text rendered in the conversation in place of the bot's answer
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            TransportErrorKind::Network => LOST_CONNECTION_MESSAGE,
            _ => GENERIC_ERROR_MESSAGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Request never completed: offline, refused, timed out
    Network,
    /// Non-success HTTP status
    Status(u16),
    /// Body was not a valid envelope
    Decode,
    Unknown,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            Self::network(e.to_string())
        } else if e.is_decode() {
            Self::decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::status(status.as_u16(), e.to_string())
        } else {
            Self::unknown(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        assert_eq!(
            TransportError::network("offline").user_message(),
            LOST_CONNECTION_MESSAGE
        );
        assert_eq!(
            TransportError::status(500, "boom").user_message(),
            GENERIC_ERROR_MESSAGE
        );
        assert_eq!(TransportError::decode("bad").user_message(), GENERIC_ERROR_MESSAGE);
    }
}
