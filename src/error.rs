//! Error types for matching, attribute extraction and policy evaluation.
//!
//! None of these escape the [`RequestHandler`](crate::RequestHandler): each is
//! converted into a deny response before the check call returns.

use std::time::Duration;

/// Why a check request did not resolve to a resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoMatch {
    /// No deployed API context is a prefix of the request path.
    #[error("no API matches the request path")]
    NoApi,
    /// An API matched but none of its resources match the remaining path.
    #[error("no resource of API '{api}' matches the request path")]
    NoResource {
        /// Name of the API selected by context.
        api: String,
    },
    /// Resources match the path, but none accept the request method.
    #[error("API '{api}' has no resource for method {method} on this path")]
    MethodNotAllowed {
        /// Name of the API selected by context.
        api: String,
        /// The rejected method.
        method: String,
    },
}

/// The inbound check message is missing or carries unusable attributes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttributeError {
    /// The message has no HTTP request attributes.
    #[error("check request carries no HTTP attributes")]
    MissingHttpAttributes,
    /// Neither the method field nor the `:method` pseudo header is set.
    #[error("check request carries no HTTP method")]
    MissingMethod,
    /// The method is not a valid HTTP token.
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),
    /// Neither the path field nor the `:path` pseudo header is set.
    #[error("check request carries no request path")]
    MissingPath,
    /// A header name cannot be represented.
    #[error("invalid header name '{0}'")]
    InvalidHeaderName(String),
    /// A header value cannot be represented.
    #[error("invalid value for header '{0}'")]
    InvalidHeaderValue(String),
}

/// A policy failed to reach a decision.
///
/// Distinct from a deliberate deny: the pipeline answers every fault with an
/// internal-error deny.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The policy reported an internal failure.
    #[error("policy fault: {0}")]
    Internal(String),

    /// The policy did not finish within the pipeline's deadline.
    #[error("policy did not complete within {0:?}")]
    Timeout(Duration),

    /// The policy panicked while evaluating.
    #[error("policy panicked")]
    Panicked,

    /// The policy produced a header that cannot be sent.
    #[error("policy produced an invalid header: {0}")]
    InvalidHeader(String),
}

impl PolicyError {
    /// Create an internal fault.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<http::header::InvalidHeaderName> for PolicyError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for PolicyError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}
