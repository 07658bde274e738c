//! Error types for the policy injector

use axum::http::StatusCode;
use thiserror::Error;

/// Main error type for policy injector operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The admission payload could not be decoded into a Deployment
    #[error("decode error: {0}")]
    Decode(String),

    /// The mutated Deployment could not be serialized back into a patch
    #[error("encode error: {0}")]
    Encode(String),

    /// Invalid startup configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// TLS material could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O error while binding or serving
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a decode error with the given message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an encode error with the given message
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a TLS error with the given message
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// HTTP status reported to the API server when this error rejects a request
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Decode(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable Kubernetes status reason
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Decode(_) => "BadRequest",
            _ => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a malformed Deployment is the caller's fault
    ///
    /// The API server receives a 400 so the failure is reported against the
    /// submitted object rather than the webhook.
    #[test]
    fn story_decode_errors_are_client_errors() {
        let err = Error::decode("invalid type: string \"three\", expected i32");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.reason(), "BadRequest");
        assert!(err.to_string().contains("decode error"));
        assert!(err.to_string().contains("expected i32"));
    }

    /// Story: failing to serialize our own mutation is a server error
    #[test]
    fn story_encode_errors_are_server_errors() {
        let err = Error::encode("key must be a string");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.reason(), "InternalError");
        assert!(err.to_string().contains("encode error"));
    }

    #[test]
    fn test_startup_errors_display() {
        assert!(Error::config("topology key must not be empty")
            .to_string()
            .contains("configuration error"));
        assert!(Error::tls("no private key found")
            .to_string()
            .contains("TLS error"));

        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
