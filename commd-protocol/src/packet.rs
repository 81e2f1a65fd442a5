//! Variable-format, hash-validated packet family.
//!
//! Packet layout (22-byte header + payload):
//!
//! ```text
//! +-----------+-----------+-----------+-----------+-----------------+
//! | delimiter | command   | data size | data hash | data            |
//! | `<`       | 1 byte    | i32 LE    | MD5       | data size bytes |
//! | 1 byte    |           | 4 bytes   | 16 bytes  |                 |
//! +-----------+-----------+-----------+-----------+-----------------+
//! ```
//!
//! The payload is validated by comparing its MD5 digest against the
//! header's hash field; a mismatch marks the packet invalid and its
//! payload is never interpreted.

use crate::ascii;
use crate::command::PacketCmd;
use bytes::{BufMut, BytesMut};
use md5::{Digest, Md5};
use std::io;
use std::sync::OnceLock;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Offset of the delimiter byte.
pub const DELIM_OFFSET: usize = 0;
/// Offset of the packet-command byte.
pub const PAC_CMD_OFFSET: usize = 1;
/// Offset of the data size field.
pub const DATA_SIZE_OFFSET: usize = 2;
/// Size of the data size field.
pub const DATA_SIZE_LENGTH: usize = 4;
/// Offset of the data hash field.
pub const DATA_HASH_OFFSET: usize = 6;
/// Size of the data hash field.
pub const DATA_HASH_LENGTH: usize = 16;
/// Offset of the payload.
pub const DATA_OFFSET: usize = 22;
/// Header size in bytes.
pub const HEADER_LENGTH: usize = 22;

/// Delimiter constant.
pub const DELIM_BYTE: u8 = b'<';

/// Payload carried by a packet, keyed by the packet command.
///
/// Only the message variant carries data; the remaining commands are
/// header-only notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    Ack,
    /// ASCII message text, parsed only after the hash check passed.
    Message(String),
    End,
    Timeout,
    Error,
    /// Command byte outside the enumeration; the packet is invalid.
    Unknown,
}

/// A variable-format packet.
#[derive(Debug, Clone)]
pub struct Packet {
    delim: u8,
    cmd_byte: u8,
    data_size: i32,
    size: i32,
    hash: [u8; DATA_HASH_LENGTH],
    body: PacketBody,
    data_valid: bool,
    valid: OnceLock<bool>,
}

impl Packet {
    /// Creates an acknowledgement packet.
    pub fn ack() -> Self {
        Self::outbound(PacketCmd::Ack, None)
    }

    /// Creates a message packet. Absent text coalesces to the empty
    /// string, so `message(None)` and `message(Some(""))` are equal.
    pub fn message(text: Option<&str>) -> Self {
        let text = text.unwrap_or("");
        let payload = ascii::encode(text);
        let mut packet = Self::outbound(PacketCmd::Message, Some(&payload));
        packet.body = PacketBody::Message(text.to_owned());
        packet
    }

    /// Creates an end-of-stream packet.
    pub fn end() -> Self {
        Self::outbound(PacketCmd::End, None)
    }

    /// Creates a timeout notification packet.
    pub fn timeout() -> Self {
        Self::outbound(PacketCmd::Timeout, None)
    }

    /// Creates an error notification packet.
    pub fn error() -> Self {
        Self::outbound(PacketCmd::Error, None)
    }

    fn outbound(cmd: PacketCmd, payload: Option<&[u8]>) -> Self {
        let (data_size, hash) = match payload {
            Some(payload) if !payload.is_empty() => {
                (payload.len() as i32, content_hash(payload))
            }
            _ => (0, [0u8; DATA_HASH_LENGTH]),
        };
        Self {
            delim: DELIM_BYTE,
            cmd_byte: cmd.as_byte(),
            data_size,
            size: data_size + HEADER_LENGTH as i32,
            hash,
            body: body_for(cmd.as_byte()),
            data_valid: true,
            valid: OnceLock::new(),
        }
    }

    /// Encodes a header-only packet for the given command.
    pub fn encode_header(cmd: PacketCmd) -> [u8; HEADER_LENGTH] {
        let mut buf = [0u8; HEADER_LENGTH];
        buf[DELIM_OFFSET] = DELIM_BYTE;
        buf[PAC_CMD_OFFSET] = cmd.as_byte();
        buf
    }

    /// Encodes a command with a payload into its full wire form: the
    /// header with the payload's size and hash, followed by the payload.
    pub fn encode(cmd: PacketCmd, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LENGTH + payload.len());
        buf.put_u8(DELIM_BYTE);
        buf.put_u8(cmd.as_byte());
        if payload.is_empty() {
            buf.put_i32_le(0);
            buf.put_bytes(0, DATA_HASH_LENGTH);
        } else {
            buf.put_i32_le(payload.len() as i32);
            buf.put_slice(&content_hash(payload));
            buf.put_slice(payload);
        }
        buf.to_vec()
    }

    /// Reads one packet from `reader`.
    ///
    /// The 22-byte header is read first; when both the total size and
    /// the declared data size are positive, exactly that many payload
    /// bytes follow. Payload reads tolerate partial reads, and any
    /// payload read failure yields an empty buffer rather than an
    /// error, which then fails hash validation and marks the packet
    /// invalid without interpreting the payload.
    pub async fn read_from<R>(reader: &mut R) -> io::Result<Packet>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LENGTH];
        read_full(reader, &mut header).await?;

        let delim = header[DELIM_OFFSET];
        let cmd_byte = header[PAC_CMD_OFFSET];
        let mut size_bytes = [0u8; DATA_SIZE_LENGTH];
        size_bytes.copy_from_slice(&header[DATA_SIZE_OFFSET..DATA_SIZE_OFFSET + DATA_SIZE_LENGTH]);
        let data_size = i32::from_le_bytes(size_bytes);
        let mut hash = [0u8; DATA_HASH_LENGTH];
        hash.copy_from_slice(&header[DATA_HASH_OFFSET..DATA_HASH_OFFSET + DATA_HASH_LENGTH]);

        let size = data_size.saturating_add(HEADER_LENGTH as i32);
        let mut packet = Packet {
            delim,
            cmd_byte,
            data_size,
            size,
            hash,
            body: body_for(cmd_byte),
            data_valid: true,
            valid: OnceLock::new(),
        };

        if packet.size > 0 && packet.data_size > 0 {
            let payload = read_payload(reader, packet.data_size as usize).await;
            packet.data_valid = content_hash(&payload) == packet.hash;
            if packet.data_valid {
                packet.parse_payload(&payload);
            }
        }

        Ok(packet)
    }

    fn parse_payload(&mut self, payload: &[u8]) {
        if let PacketBody::Message(ref mut text) = self.body {
            *text = ascii::decode(payload);
        }
    }

    /// Returns whether the packet is valid in its entirety. The result
    /// is memoized after the first computation.
    pub fn is_valid(&self) -> bool {
        *self.valid.get_or_init(|| {
            if !self.data_valid {
                return false;
            }
            if self.delim != DELIM_BYTE {
                return false;
            }
            if self.size < HEADER_LENGTH as i32 || self.data_size < 0 {
                return false;
            }
            PacketCmd::from_byte(self.cmd_byte).is_some()
        })
    }

    /// Re-serializes the packet from its header fields and body; a
    /// stored raw buffer is never kept. Round-trips losslessly with
    /// [`Packet::read_from`] for all fields, including the hash.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::zeroed(self.size.max(HEADER_LENGTH as i32) as usize);
        buf[DELIM_OFFSET] = self.delim;
        buf[PAC_CMD_OFFSET] = self.cmd_byte;
        buf[DATA_SIZE_OFFSET..DATA_SIZE_OFFSET + DATA_SIZE_LENGTH]
            .copy_from_slice(&self.data_size.to_le_bytes());
        buf[DATA_HASH_OFFSET..DATA_HASH_OFFSET + DATA_HASH_LENGTH].copy_from_slice(&self.hash);
        if let PacketBody::Message(ref text) = self.body {
            let encoded = ascii::encode(text);
            buf[DATA_OFFSET..DATA_OFFSET + encoded.len()].copy_from_slice(&encoded);
        }
        buf.to_vec()
    }

    /// Returns the packet command, if the command byte is recognized.
    pub fn cmd(&self) -> Option<PacketCmd> {
        PacketCmd::from_byte(self.cmd_byte)
    }

    /// Returns the raw command byte.
    pub fn cmd_byte(&self) -> u8 {
        self.cmd_byte
    }

    /// Returns the total packet size (header + payload).
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Returns the declared payload size.
    pub fn data_size(&self) -> i32 {
        self.data_size
    }

    /// Returns the payload hash field.
    pub fn hash(&self) -> &[u8; DATA_HASH_LENGTH] {
        &self.hash
    }

    /// Returns the packet body.
    pub fn body(&self) -> &PacketBody {
        &self.body
    }

    /// Returns the message text for message packets.
    pub fn message_text(&self) -> Option<&str> {
        match self.body {
            PacketBody::Message(ref text) => Some(text),
            _ => None,
        }
    }
}

/// Equality is structural over the header fields plus, for message
/// packets, the decoded text.
impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.delim == other.delim
            && self.cmd_byte == other.cmd_byte
            && self.data_size == other.data_size
            && self.size == other.size
            && self.hash == other.hash
            && self.body == other.body
    }
}

impl Eq for Packet {}

fn body_for(cmd_byte: u8) -> PacketBody {
    match PacketCmd::from_byte(cmd_byte) {
        Some(PacketCmd::Ack) => PacketBody::Ack,
        Some(PacketCmd::Message) => PacketBody::Message(String::new()),
        Some(PacketCmd::End) => PacketBody::End,
        Some(PacketCmd::Timeout) => PacketBody::Timeout,
        Some(PacketCmd::Error) => PacketBody::Error,
        None => PacketBody::Unknown,
    }
}

/// MD5 digest of the payload bytes.
pub fn content_hash(payload: &[u8]) -> [u8; DATA_HASH_LENGTH] {
    Md5::digest(payload).into()
}

/// Fills `buf` from the reader, tolerating partial reads and stopping
/// early at end-of-data.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reads exactly `len` payload bytes. Any read failure yields an empty
/// buffer; the resulting hash mismatch invalidates the packet instead
/// of propagating the error.
async fn read_payload<R>(reader: &mut R, len: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    match read_full(reader, &mut buf).await {
        Ok(_) => buf,
        Err(_) => Vec::new(),
    }
}
