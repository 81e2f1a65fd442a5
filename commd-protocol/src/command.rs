//! Command enumerations for both packet families.

/// Command byte carried by the fixed-format packet.
///
/// The values are part of the wire contract and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cmd {
    /// Anything that is not a recognized command byte.
    Undefined = 0,
    /// Acknowledges command reception.
    Ack = 128,
    /// Notifies the client that the message stream has ended.
    End = 129,
    /// Requests the status of the service.
    Status = 130,
    /// Requests the configuration of the service.
    DumpConfig = 131,
    /// Requests service state statistics.
    DumpStats = 140,
    /// Carries a string message payload.
    Message = 141,
    /// Notifies the client that an expected message did not arrive in time.
    Timeout = 142,
    /// Notifies the client that an error was encountered.
    Error = 143,
}

impl Cmd {
    /// Maps a raw command byte to a command.
    ///
    /// Unrecognized bytes map to [`Cmd::Undefined`] rather than failing,
    /// so a corrupted command byte still produces a decodable packet.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            128 => Cmd::Ack,
            129 => Cmd::End,
            130 => Cmd::Status,
            131 => Cmd::DumpConfig,
            140 => Cmd::DumpStats,
            141 => Cmd::Message,
            142 => Cmd::Timeout,
            143 => Cmd::Error,
            _ => Cmd::Undefined,
        }
    }

    /// Returns the wire byte for this command.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Command byte carried in the variable-format packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketCmd {
    Ack = 0,
    Message = 1,
    End = 2,
    Timeout = 3,
    Error = 4,
}

impl PacketCmd {
    /// Maps a raw header byte to a packet command, or `None` if the
    /// byte is not part of the enumeration.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PacketCmd::Ack),
            1 => Some(PacketCmd::Message),
            2 => Some(PacketCmd::End),
            3 => Some(PacketCmd::Timeout),
            4 => Some(PacketCmd::Error),
            _ => None,
        }
    }

    /// Returns the wire byte for this packet command.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_roundtrips_recognized_bytes() {
        for cmd in [
            Cmd::Ack,
            Cmd::End,
            Cmd::Status,
            Cmd::DumpConfig,
            Cmd::DumpStats,
            Cmd::Message,
            Cmd::Timeout,
            Cmd::Error,
        ] {
            assert_eq!(Cmd::from_byte(cmd.as_byte()), cmd);
        }
    }

    #[test]
    fn cmd_unrecognized_byte_is_undefined() {
        assert_eq!(Cmd::from_byte(1), Cmd::Undefined);
        assert_eq!(Cmd::from_byte(127), Cmd::Undefined);
        assert_eq!(Cmd::from_byte(132), Cmd::Undefined);
        assert_eq!(Cmd::from_byte(255), Cmd::Undefined);
    }

    #[test]
    fn packet_cmd_roundtrips() {
        for cmd in [
            PacketCmd::Ack,
            PacketCmd::Message,
            PacketCmd::End,
            PacketCmd::Timeout,
            PacketCmd::Error,
        ] {
            assert_eq!(PacketCmd::from_byte(cmd.as_byte()), Some(cmd));
        }
        assert_eq!(PacketCmd::from_byte(5), None);
        assert_eq!(PacketCmd::from_byte(255), None);
    }
}
