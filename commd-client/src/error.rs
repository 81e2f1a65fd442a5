//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] commd_protocol::ProtocolError),

    #[error("could not resolve host {0:?}")]
    Unresolvable(String),

    #[error("connect timeout")]
    ConnectTimeout,

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("malformed response packet")]
    MalformedResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = ClientError::Unresolvable("nowhere".to_string());
        assert!(err.to_string().contains("nowhere"));
        assert_eq!(
            ClientError::MalformedResponse.to_string(),
            "malformed response packet"
        );
    }
}
