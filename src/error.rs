use std::time::Duration;

use thiserror::Error;

use crate::types::{FinalResult, Operation};

/// Aggregates every failure mode exposed by the unified LLM client.
///
/// Adapters only ever produce [`LLMError::Transport`], [`LLMError::Protocol`],
/// [`LLMError::UnsupportedOperation`] or [`LLMError::Validation`]. The orchestrator
/// consumes the first two as "adapter failed, try the next façade" and wraps the
/// final failure of a chain into [`LLMError::Provider`].
#[derive(Debug, Error)]
pub enum LLMError {
    /// Network-level failure: connection errors, timeouts and non-2xx statuses.
    #[error("transport error: {message}")]
    Transport {
        /// Human-readable description, including the vendor message when available.
        message: String,
        /// HTTP status when the failure was a non-2xx response.
        status: Option<u16>,
        /// Optional wait duration suggested by the provider before retrying.
        retry_after: Option<Duration>,
    },
    /// The vendor returned data the adapter or normalizer cannot interpret.
    #[error("protocol error from {provider}: {message}")]
    Protocol {
        /// Name of the adapter that failed to parse the payload.
        provider: &'static str,
        /// Description of the malformed unit.
        message: String,
    },
    /// The selected adapter does not offer the requested capability.
    #[error("{provider} does not support {operation}")]
    UnsupportedOperation {
        provider: &'static str,
        operation: Operation,
    },
    /// Terminal failure after every façade in the fallback chain was attempted.
    #[error("all providers failed (attempted: {}): {source}", attempted.join(", "))]
    Provider {
        /// Handles of every façade attempted, in chain order.
        attempted: Vec<String>,
        /// The failure reported by the last attempted façade.
        #[source]
        source: Box<LLMError>,
    },
    /// Signals a request that cannot be built locally.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// A callback failed after the result had already been produced.
    ///
    /// The produced result travels with the error so callers can still use it.
    #[error("callback failed: {message}")]
    Callback {
        /// The result the core produced before the callback ran.
        result: Box<FinalResult>,
        /// Message reported by the callback.
        message: String,
    },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use unillm::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { status: None, .. }));
    /// assert!(err.is_recoverable());
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    /// Creates an [`LLMError::Transport`] describing a non-2xx HTTP status.
    pub fn http_status<T: Into<String>>(
        status: u16,
        message: T,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::Transport {
            message: format!("status {status}: {}", message.into()),
            status: Some(status),
            retry_after,
        }
    }

    /// Creates an [`LLMError::Protocol`] for the given adapter.
    ///
    /// # Examples
    ///
    /// ```
    /// use unillm::error::LLMError;
    ///
    /// let err = LLMError::protocol("openai_chat", "bad JSON payload");
    /// assert!(matches!(err, LLMError::Protocol { provider: "openai_chat", .. }));
    /// ```
    pub fn protocol<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Protocol {
            provider,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::UnsupportedOperation`].
    pub fn unsupported(provider: &'static str, operation: Operation) -> Self {
        Self::UnsupportedOperation {
            provider,
            operation,
        }
    }

    /// Returns `true` when the failure may be recovered by trying the next façade.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Protocol { .. })
    }

    /// Handles attempted before the error was raised, when the error is terminal.
    pub fn attempted(&self) -> &[String] {
        match self {
            Self::Provider { attempted, .. } => attempted,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_protocol_are_recoverable() {
        assert!(LLMError::transport("reset").is_recoverable());
        assert!(LLMError::http_status(503, "busy", None).is_recoverable());
        assert!(LLMError::protocol("p", "garbled").is_recoverable());
        assert!(!LLMError::unsupported("p", Operation::Embed).is_recoverable());
        assert!(
            !LLMError::Validation {
                message: "no model".into()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn provider_error_lists_attempted_handles() {
        let err = LLMError::Provider {
            attempted: vec!["primary".into(), "backup".into()],
            source: Box::new(LLMError::transport("timeout")),
        };
        assert_eq!(err.attempted(), ["primary", "backup"]);
        let text = err.to_string();
        assert!(text.contains("primary, backup"), "unexpected display: {text}");
        assert!(text.contains("timeout"), "unexpected display: {text}");
    }

    #[test]
    fn http_status_keeps_status_and_retry_hint() {
        let err = LLMError::http_status(429, "slow down", Some(Duration::from_secs(3)));
        match err {
            LLMError::Transport {
                message,
                status,
                retry_after,
            } => {
                assert_eq!(status, Some(429));
                assert_eq!(retry_after, Some(Duration::from_secs(3)));
                assert!(message.contains("slow down"));
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }
}
