//! Unified error type for prompt translation and completion calls.
//!
//! Every stage maps its failures into [`LlmError`]: dialect translation
//! raises [`Configuration`](LlmError::Configuration) before any network
//! traffic, endpoints raise [`Provider`](LlmError::Provider) or
//! [`Timeout`](LlmError::Timeout) with the raw response body attached, and
//! the tool-call parsers raise [`ToolCallMalformed`](LlmError::ToolCallMalformed).
//!
//! # Provider errors
//!
//! Non-2xx responses, transport failures, and timeouts are all provider
//! errors. Use the accessors instead of matching on the variant shape:
//!
//! ```rust
//! use llm_dialects::LlmError;
//!
//! let err = LlmError::Provider {
//!     status: Some(http::StatusCode::TOO_MANY_REQUESTS),
//!     message: "rate limited".into(),
//!     body: r#"{"error":"slow down"}"#.into(),
//!     retryable: true,
//! };
//! assert!(err.is_provider_error());
//! assert_eq!(err.status(), Some(http::StatusCode::TOO_MANY_REQUESTS));
//! assert_eq!(err.body(), Some(r#"{"error":"slow down"}"#));
//! ```

use std::fmt;

use serde_json::Value;

/// The unified error type returned by every fallible operation in the
/// workspace.
///
/// Variants are `#[non_exhaustive]` so new kinds can be added without
/// breaking downstream matches.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LlmError {
    /// The prompt, tool set, or model configuration cannot be rendered for
    /// the target dialect or endpoint. Raised before any network call and
    /// never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A non-2xx HTTP response or a transport failure.
    ///
    /// `status` is `None` when no response was received (DNS failure,
    /// connection reset, broken stream).
    #[error("Provider error (status={status:?}): {message}")]
    Provider {
        /// The HTTP status code, if one was received.
        status: Option<http::StatusCode>,
        /// A human-readable description, extracted from the error body
        /// when the provider's error shape is recognized.
        message: String,
        /// The raw response body, for diagnostics. Empty for transport
        /// failures.
        body: String,
        /// Whether the failure is transient.
        retryable: bool,
    },

    /// The request or the stream exceeded its deadline.
    #[error("Provider timed out after {elapsed_ms}ms ({phase})")]
    Timeout {
        /// Milliseconds elapsed before the timeout fired.
        elapsed_ms: u64,
        /// Which deadline fired.
        phase: TimeoutPhase,
    },

    /// An extracted tool-call payload is not valid for its encoding.
    #[error("Malformed tool call: {message}")]
    ToolCallMalformed {
        /// What was wrong with the payload.
        message: String,
        /// The accumulated raw payload.
        raw: String,
    },

    /// A successful response body could not be decoded.
    #[error("Response format error: {message}")]
    ResponseFormat {
        /// What went wrong during decoding.
        message: String,
        /// The raw response body, for diagnostics.
        raw: String,
    },

    /// A structured-output response failed JSON Schema validation.
    #[error("Schema validation error: {message}")]
    SchemaValidation {
        /// Concatenated validation error messages.
        message: String,
        /// The schema the value was validated against.
        schema: Value,
        /// The value that failed validation.
        actual: Value,
    },

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,
}

/// Identifies which deadline produced a [`LlmError::Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// The whole blocking request, or the connect phase of a stream.
    Request,
    /// The gap between two consecutive stream chunks.
    StreamIdle,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::StreamIdle => f.write_str("stream idle"),
        }
    }
}

impl LlmError {
    /// Shorthand for a [`Configuration`](Self::Configuration) error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Shorthand for a [`ToolCallMalformed`](Self::ToolCallMalformed) error.
    pub fn malformed_tool_call(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::ToolCallMalformed {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Returns `true` for failures that originate at the provider:
    /// non-2xx responses, transport errors, and timeouts.
    pub fn is_provider_error(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Timeout { .. })
    }

    /// The HTTP status code, when the provider answered.
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Self::Provider { status, .. } => *status,
            _ => None,
        }
    }

    /// The raw provider response body, when one was captured.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Provider { body, .. } => Some(body),
            Self::ResponseFormat { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// Returns `true` if the error is transient and a retry may succeed.
    ///
    /// Timeouts are always retryable. Nothing else outside
    /// [`Provider`](Self::Provider) is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::ResponseFormat {
            message: err.to_string(),
            raw: String::new(),
        }
    }
}

/// Returns whether an HTTP status code denotes a transient failure.
pub fn is_retryable_status(status: http::StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504 | 529)
}
