/// Command codes and decoded requests

use crate::geometry::{SectorAddress, SECTOR_LEN};

/// Command byte following an attention byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Debug output byte from the remote (0xFE)
    Debug,
    /// Printer/list output (0x01), reserved
    Printer,
    /// Punch output (0x02), reserved
    Punch,
    /// Reader output (0x03), reserved
    Reader,
    /// Disk check (0x0F)
    DiskCheck,
    /// Disk sector read (0x10)
    DiskRead,
    /// Disk sector write (0x11)
    DiskWrite,
    /// Host receives a file over the side channel (0x12)
    ReceiveFile,
    /// Host sends a file over the side channel (0x13)
    SendFile,
    /// Unassigned code
    Unknown(u8),
}

impl Command {
    /// Command code byte
    pub const DEBUG: u8 = 0xFE;
    /// Printer code byte
    pub const PRINTER: u8 = 0x01;
    /// Punch code byte
    pub const PUNCH: u8 = 0x02;
    /// Reader code byte
    pub const READER: u8 = 0x03;
    /// Disk check code byte
    pub const DISK_CHECK: u8 = 0x0F;
    /// Disk read code byte
    pub const DISK_READ: u8 = 0x10;
    /// Disk write code byte
    pub const DISK_WRITE: u8 = 0x11;
    /// Receive file code byte
    pub const RECEIVE_FILE: u8 = 0x12;
    /// Send file code byte
    pub const SEND_FILE: u8 = 0x13;

    /// Decode a command byte
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::DEBUG => Command::Debug,
            Self::PRINTER => Command::Printer,
            Self::PUNCH => Command::Punch,
            Self::READER => Command::Reader,
            Self::DISK_CHECK => Command::DiskCheck,
            Self::DISK_READ => Command::DiskRead,
            Self::DISK_WRITE => Command::DiskWrite,
            Self::RECEIVE_FILE => Command::ReceiveFile,
            Self::SEND_FILE => Command::SendFile,
            other => Command::Unknown(other),
        }
    }

    /// Encode back to the wire byte
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Debug => Self::DEBUG,
            Command::Printer => Self::PRINTER,
            Command::Punch => Self::PUNCH,
            Command::Reader => Self::READER,
            Command::DiskCheck => Self::DISK_CHECK,
            Command::DiskRead => Self::DISK_READ,
            Command::DiskWrite => Self::DISK_WRITE,
            Command::ReceiveFile => Self::RECEIVE_FILE,
            Command::SendFile => Self::SEND_FILE,
            Command::Unknown(byte) => byte,
        }
    }

    /// Number of argument bytes that follow the command byte
    pub fn arg_len(self) -> usize {
        match self {
            Command::Debug | Command::DiskCheck => 1,
            Command::DiskRead => 3,
            Command::DiskWrite => 3 + SECTOR_LEN,
            _ => 0,
        }
    }

    /// Build the request once all argument bytes have arrived
    ///
    /// `args` must hold exactly `arg_len()` bytes.
    pub fn into_request(self, args: &[u8]) -> Request {
        debug_assert_eq!(args.len(), self.arg_len());
        match self {
            Command::Debug => Request::Debug(args[0]),
            Command::Printer => Request::Printer,
            Command::Punch => Request::Punch,
            Command::Reader => Request::Reader,
            Command::DiskCheck => Request::DiskCheck { drive: args[0] },
            Command::DiskRead => Request::DiskRead(SectorAddress::new(args[0], args[1], args[2])),
            Command::DiskWrite => Request::DiskWrite {
                address: SectorAddress::new(args[0], args[1], args[2]),
                data: args[3..].to_vec(),
            },
            Command::ReceiveFile => Request::ReceiveFile,
            Command::SendFile => Request::SendFile,
            Command::Unknown(byte) => Request::Unknown(byte),
        }
    }
}

/// A fully framed command ready for dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Informational byte from the remote
    Debug(u8),
    /// Printer output, ignored
    Printer,
    /// Punch output, ignored
    Punch,
    /// Reader output, ignored
    Reader,
    /// Check that a drive's image can be opened
    DiskCheck {
        /// Drive slot
        drive: u8,
    },
    /// Read a sector
    DiskRead(SectorAddress),
    /// Write a sector
    DiskWrite {
        /// Target sector
        address: SectorAddress,
        /// Sector payload, always `SECTOR_LEN` bytes
        data: Vec<u8>,
    },
    /// Start a transfer into the host
    ReceiveFile,
    /// Start a transfer out of the host
    SendFile,
    /// Unassigned command, ignored
    Unknown(u8),
}
