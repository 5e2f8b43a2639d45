//! Error types shared across the manifest, chunking, and transfer-store
//! layers.
//!
//! Mirrors the categorized-enum-with-helper-methods shape used throughout
//! the rest of this workspace: one variant per error kind, a short
//! machine-readable `code()`, and an `is_recoverable()` hint for callers
//! deciding whether to retry.

use thiserror::Error;

/// The result type used throughout `fileferry-core`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A request body or wire message did not parse or did not satisfy its
    /// schema.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A signed manifest's signature did not verify against its embedded
    /// public key, or the public key was not of the expected algorithm.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The concurrency guard already has a task in flight.
    #[error("busy")]
    Busy,

    /// The human operator declined the proposed transfer.
    #[error("transfer rejected")]
    Rejected,

    /// An operation was cancelled via its cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// An operation exceeded its deadline.
    #[error("timed out")]
    Timeout,

    /// The data channel (or underlying transport) failed.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// A reassembled file's content hash did not match the manifest's
    /// expected hash.
    #[error("integrity check failed for {0}")]
    IntegrityFailed(String),

    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// Anything else: a programming invariant was violated, or a
    /// dependency failed in a way the caller cannot act on.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// A short, stable, machine-readable identifier for this error kind —
    /// suitable for programmatic comparison across the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::InvalidSignature(_) => "invalid_signature",
            Error::Busy => "busy",
            Error::Rejected => "rejected",
            Error::Cancelled => "cancelled",
            Error::Timeout => "timeout",
            Error::TransportFailure(_) => "transport_failure",
            Error::IntegrityFailed(_) => "integrity_failed",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether a caller might reasonably retry the operation that produced
    /// this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Busy | Error::Timeout | Error::TransportFailure(_)
        )
    }

    /// Whether this error should consume the session's concurrency slot.
    /// `InvalidRequest`/`InvalidSignature` are rejected before admission
    /// and must not do so (§7).
    pub fn consumes_concurrency_slot(&self) -> bool {
        !matches!(self, Error::InvalidRequest(_) | Error::InvalidSignature(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Busy.code(), "busy");
        assert_eq!(Error::Rejected.code(), "rejected");
        assert_eq!(
            Error::IntegrityFailed("x".into()).code(),
            "integrity_failed"
        );
    }

    #[test]
    fn recoverability() {
        assert!(Error::Busy.is_recoverable());
        assert!(!Error::InvalidSignature("x".into()).is_recoverable());
    }

    #[test]
    fn invalid_request_and_signature_do_not_consume_slot() {
        assert!(!Error::InvalidRequest("x".into()).consumes_concurrency_slot());
        assert!(!Error::InvalidSignature("x".into()).consumes_concurrency_slot());
        assert!(Error::Busy.consumes_concurrency_slot());
    }
}
