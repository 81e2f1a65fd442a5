//! Fixed-format command packet.
//!
//! Packet layout (20 bytes total, fields at fixed offsets):
//!
//! ```text
//! +-----------+---------+-------------+-----------------+-----------+
//! | start     | command | data length | data            | end       |
//! | `<<<`     | 1 byte  | i32 LE      | 9 bytes, padded | `>>>`     |
//! | 3 bytes   |         | 4 bytes     |                 | 3 bytes   |
//! +-----------+---------+-------------+-----------------+-----------+
//! ```
//!
//! A data length of `-1` means no data, `0` means an empty string, and
//! `1..=9` means that many ASCII bytes follow, zero-padded to the slot.

use crate::ascii;
use crate::command::Cmd;
use crate::error::ProtocolError;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Total packet size in bytes.
pub const PACKET_SIZE: usize = 20;
/// Offset of the packet body (first byte after the start delimiter).
pub const BODY_OFFSET: usize = 3;
/// Size of the packet body between the delimiters.
pub const BODY_SIZE: usize = 14;
/// Offset of the command byte.
pub const COMMAND_OFFSET: usize = 3;
/// Offset of the data length field.
pub const DATA_LENGTH_OFFSET: usize = 4;
/// Size of the data length field.
pub const DATA_LENGTH_SIZE: usize = 4;
/// Offset of the data slot.
pub const DATA_OFFSET: usize = 8;
/// Size of the data slot.
pub const DATA_SIZE: usize = 9;

/// Start delimiter byte.
pub const DELIMITER_START: u8 = b'<';
/// End delimiter byte.
pub const DELIMITER_END: u8 = b'>';
/// Number of delimiter bytes on each side.
pub const DELIMITER_COUNT: usize = 3;

/// A fixed-format command/response packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    cmd: Cmd,
    data: Option<String>,
    data_length: i32,
}

impl CommandPacket {
    /// Creates a packet for the given command and optional data.
    ///
    /// Fails with [`ProtocolError::DataTooLong`] if `data` does not fit
    /// the 9-byte data slot; oversized payloads are rejected at
    /// construction time, never silently truncated.
    pub fn new(cmd: Cmd, data: Option<&str>) -> Result<Self, ProtocolError> {
        if let Some(data) = data {
            if data.len() > DATA_SIZE {
                return Err(ProtocolError::DataTooLong {
                    len: data.len(),
                    max: DATA_SIZE,
                });
            }
        }
        Ok(Self {
            cmd,
            data_length: data.map_or(-1, |d| d.len() as i32),
            data: data.map(str::to_owned),
        })
    }

    /// Returns the command.
    pub fn cmd(&self) -> Cmd {
        self.cmd
    }

    /// Returns the data component, if present.
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// Returns the data length field value (`-1` when data is absent).
    pub fn data_length(&self) -> i32 {
        self.data_length
    }

    /// Encodes the packet into its 20-byte wire form.
    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        let mut buf = Self::empty_buffer();
        buf[COMMAND_OFFSET] = self.cmd.as_byte();
        buf[DATA_LENGTH_OFFSET..DATA_LENGTH_OFFSET + DATA_LENGTH_SIZE]
            .copy_from_slice(&self.data_length.to_le_bytes());
        if let Some(ref data) = self.data {
            let encoded = ascii::encode(data);
            buf[DATA_OFFSET..DATA_OFFSET + encoded.len()].copy_from_slice(&encoded);
        }
        buf
    }

    /// Returns a zeroed packet buffer with both delimiters set.
    pub fn empty_buffer() -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        for b in &mut buf[..DELIMITER_COUNT] {
            *b = DELIMITER_START;
        }
        for b in &mut buf[PACKET_SIZE - DELIMITER_COUNT..] {
            *b = DELIMITER_END;
        }
        buf
    }

    /// Decodes a packet from a buffer.
    ///
    /// Returns `None` if fewer than 20 bytes are present, if any
    /// delimiter byte is wrong, or if the declared data length is below
    /// `-1`. An unrecognized command byte decodes to [`Cmd::Undefined`].
    ///
    /// A declared length greater than 9 is clamped to 9: encode-time is
    /// strict but decode-time is lenient, because remote peers cannot be
    /// trusted to fill the length field honestly. A positive-length data
    /// slice whose bytes are all zero decodes as absent data, not as a
    /// string of NULs; the legacy format cannot distinguish stale buffer
    /// content from real data, and clients depend on this reading.
    pub fn decode(buf: &[u8]) -> Option<CommandPacket> {
        if buf.len() < PACKET_SIZE || !check_format(buf) {
            return None;
        }

        let cmd = Cmd::from_byte(buf[COMMAND_OFFSET]);

        let declared = i32::from_le_bytes(
            buf[DATA_LENGTH_OFFSET..DATA_LENGTH_OFFSET + DATA_LENGTH_SIZE]
                .try_into()
                .ok()?,
        );
        let data_length = declared.min(DATA_SIZE as i32);

        let data = match data_length {
            0 => Some(String::new()),
            -1 => None,
            len if len < -1 => return None,
            len => {
                let slice = &buf[DATA_OFFSET..DATA_OFFSET + len as usize];
                if slice.iter().all(|&b| b == 0) {
                    None
                } else {
                    Some(ascii::decode(slice))
                }
            }
        };

        // Reconstructs through the constructor so the length field is
        // re-derived from the decoded data, not the declared value.
        Self::new(cmd, data.as_deref()).ok()
    }

    /// Reads one packet worth of bytes from `reader` and decodes them.
    ///
    /// Partial reads are tolerated: reading continues until 20 bytes are
    /// accumulated or the source reports end-of-data (a zero-byte read),
    /// in which case the short buffer fails validation and `None` is
    /// returned. End-of-data before the first byte maps to an
    /// [`io::ErrorKind::UnexpectedEof`] error so callers can tell a
    /// closed connection apart from a garbled packet.
    pub async fn read_from<R>(reader: &mut R) -> io::Result<Option<CommandPacket>>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; PACKET_SIZE];
        let mut filled = 0;
        while filled < PACKET_SIZE {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before a packet arrived",
            ));
        }

        Ok(Self::decode(&buf[..filled]))
    }
}

/// Checks that both delimiter runs are intact.
fn check_format(buf: &[u8]) -> bool {
    buf[..DELIMITER_COUNT].iter().all(|&b| b == DELIMITER_START)
        && buf[BODY_OFFSET + BODY_SIZE..PACKET_SIZE]
            .iter()
            .all(|&b| b == DELIMITER_END)
}
