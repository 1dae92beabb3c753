/// Wire protocol: in-band commands multiplexed on the terminal stream

/// Command codes and decoded requests
pub mod command;
/// Byte-at-a-time framing state machine
pub mod framer;

pub use command::{Command, Request};
pub use framer::{Frame, Framer, LinkState, PendingCommand};

/// In-band attention byte; doubled to send a literal 0xFF
pub const ATTENTION: u8 = 0xFF;

/// Status reply for a successful command
pub const STATUS_OK: u8 = 0x00;

/// Status reply for any failed command
pub const STATUS_ERROR: u8 = 0xFF;
