//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] commd_protocol::ProtocolError),

    #[error("could not resolve host {0:?}")]
    Unresolvable(String),

    #[error("custom command code {code} outside [128, 256)")]
    InvalidCustomCommand { code: u32 },
}
