//! Protocol error types.

use thiserror::Error;

/// Errors raised while constructing packets.
///
/// Decode-level failures are never errors: malformed input yields
/// `None` (fixed packets) or an invalid packet (variable packets),
/// and the caller decides what to do with it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A packet was constructed with more payload than its data slot holds.
    /// This is a programming error at the call site, not a network condition.
    #[error("packet data length {len} exceeds the {max}-byte data slot")]
    DataTooLong { len: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_too_long_display() {
        let err = ProtocolError::DataTooLong { len: 12, max: 9 };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("9-byte"));
    }
}
