//! # commd-protocol
//!
//! Wire protocol implementation for commd.
//!
//! This crate provides:
//! - The fixed-format 20-byte command packet used for the live
//!   client/server exchange ([`CommandPacket`])
//! - The variable-format, hash-validated packet family ([`Packet`])
//! - Command enumerations and protocol constants

pub mod command;
pub mod error;
pub mod fixed;
pub mod packet;

pub use command::{Cmd, PacketCmd};
pub use error::ProtocolError;
pub use fixed::{CommandPacket, PACKET_SIZE};
pub use packet::{Packet, PacketBody, HEADER_LENGTH};

/// Default port for the commd server.
pub const DEFAULT_PORT: u16 = 11000;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 10;

/// ASCII text codec shared by both packet formats. Bytes outside the
/// ASCII range decode to `?`, matching the legacy wire behavior.
pub(crate) mod ascii {
    pub fn decode(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '?' })
            .collect()
    }

    pub fn encode(text: &str) -> Vec<u8> {
        text.chars()
            .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn non_ascii_maps_to_question_mark() {
            assert_eq!(decode(&[b'a', 0xFF, b'b']), "a?b");
            assert_eq!(encode("aéb"), vec![b'a', b'?', b'b']);
        }

        #[test]
        fn roundtrips_plain_ascii() {
            assert_eq!(decode(&encode("Msg: 42")), "Msg: 42");
        }
    }
}
