//! Proxy-related errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during proxy operations.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ProxyError {
    /// No API key in the request header or provider configuration
    #[error("Missing credential for {provider}")]
    MissingCredential {
        /// Provider the request would have been sent to
        provider: String,
    },

    /// Rate limited by upstream (429)
    #[error("Rate limited by {provider}{}", retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited {
        /// Name of the provider that rate limited the request
        provider: String,
        /// Seconds to wait before retrying (from Retry-After header)
        retry_after_secs: Option<u64>,
    },

    /// Upstream provider is unreachable (connect/transport failure)
    #[error("Upstream {provider} unavailable: {message}")]
    UpstreamUnavailable {
        /// Name of the upstream provider
        provider: String,
        /// Detailed error message from the transport layer
        message: String,
    },

    /// Request validation failed
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of what validation failed
        message: String,
    },

    /// Stream error during SSE transmission
    #[error("Stream error: {message}")]
    StreamError {
        /// Description of the streaming failure
        message: String,
    },

    /// Usage ledger read/write failure
    #[error("Ledger error: {message}")]
    Ledger {
        /// Underlying storage error
        message: String,
    },

    /// Startup configuration error (fatal)
    #[error("Configuration error: {message}")]
    Config {
        /// What is misconfigured
        message: String,
    },
}

impl ProxyError {
    /// Get HTTP status code for this error.
    pub const fn http_status_code(&self) -> u16 {
        match *self {
            Self::MissingCredential { .. } => 401,
            Self::RateLimited { .. } => 429,
            Self::UpstreamUnavailable { .. } | Self::StreamError { .. } => 502,
            Self::InvalidRequest { .. } => 400,
            Self::Ledger { .. } | Self::Config { .. } => 500,
        }
    }

    /// Short tag recorded as `error_type` on usage log rows.
    pub const fn error_type(&self) -> &'static str {
        match *self {
            Self::MissingCredential { .. } => "authentication_error",
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::UpstreamUnavailable { .. } => "connection_error",
            Self::InvalidRequest { .. } => "invalid_request_error",
            Self::StreamError { .. } => "stream_error",
            Self::Ledger { .. } => "storage_error",
            Self::Config { .. } => "configuration_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            ProxyError::RateLimited { provider: "anthropic".to_string(), retry_after_secs: None }
                .http_status_code(),
            429
        );
        assert_eq!(
            ProxyError::MissingCredential { provider: "anthropic".to_string() }.http_status_code(),
            401
        );
        assert_eq!(
            ProxyError::InvalidRequest { message: "bad".to_string() }.http_status_code(),
            400
        );
    }

    #[test]
    fn test_error_type_tags() {
        let err = ProxyError::RateLimited {
            provider: "anthropic".to_string(),
            retry_after_secs: Some(60),
        };
        assert_eq!(err.error_type(), "rate_limit_exceeded");
    }
}
