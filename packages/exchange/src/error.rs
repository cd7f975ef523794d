//! Error types for exchange buffers.

use thiserror::Error;

/// Errors raised by exchange buffers and their registry.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The variant cannot perform this operation.
    #[error("{operation} is not supported by {variant} exchange buffers")]
    Unsupported {
        variant: &'static str,
        operation: &'static str,
    },

    /// No live buffer is registered under the handle.
    #[error("unknown exchange buffer handle: {0}")]
    UnknownHandle(u32),

    /// The status code is outside the HTTP range.
    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    /// The backing transport has gone away.
    #[error("exchange buffer closed")]
    Closed,

    /// An I/O error from the backing transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for exchange buffer operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Log and return an [`ExchangeError::Unsupported`].
pub(crate) fn unsupported<T>(variant: &'static str, operation: &'static str) -> Result<T> {
    tracing::error!(variant, operation, "operation not supported by exchange buffer");
    Err(ExchangeError::Unsupported { variant, operation })
}
