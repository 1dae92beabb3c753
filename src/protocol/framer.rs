/// Framing state machine
///
/// Splits the inbound serial stream into plain data and in-band commands.
/// Bytes must be fed one at a time in arrival order; argument bytes are
/// counted against the pending command however the stream was chunked.

use crate::protocol::command::{Command, Request};
use crate::protocol::ATTENTION;

/// Observable state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Plain data flows to the display
    Idle,
    /// An attention byte arrived; the next byte is a command
    AttentionSeen,
    /// Collecting the argument bytes of a command
    CollectingArgs,
    /// A transfer owns the side channel; plain data goes to its queue
    SideChannelActive,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Idle => write!(f, "Idle"),
            LinkState::AttentionSeen => write!(f, "Attention"),
            LinkState::CollectingArgs => write!(f, "Collecting"),
            LinkState::SideChannelActive => write!(f, "Side channel"),
        }
    }
}

/// A command waiting for its argument bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Command being collected
    pub command: Command,
    /// Argument bytes still required
    pub remaining: usize,
    /// Argument bytes received so far
    pub args: Vec<u8>,
}

impl PendingCommand {
    fn new(command: Command) -> Self {
        let len = command.arg_len();
        Self {
            command,
            remaining: len,
            args: Vec::with_capacity(len),
        }
    }
}

/// Output of one framing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A data byte for whichever sink is active (display or side channel)
    Data(u8),
    /// A complete command
    Request(Request),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum Mode {
    #[default]
    Idle,
    Attention,
    Collecting(PendingCommand),
}

/// Byte-at-a-time framer
#[derive(Debug, Clone, Default)]
pub struct Framer {
    mode: Mode,
}

impl Framer {
    /// Create a framer in the idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one inbound byte
    pub fn feed(&mut self, byte: u8) -> Option<Frame> {
        match std::mem::take(&mut self.mode) {
            Mode::Idle => {
                if byte == ATTENTION {
                    self.mode = Mode::Attention;
                    None
                } else {
                    Some(Frame::Data(byte))
                }
            }
            Mode::Attention => {
                // Doubled attention is an escaped literal
                if byte == ATTENTION {
                    return Some(Frame::Data(ATTENTION));
                }
                let pending = PendingCommand::new(Command::from_byte(byte));
                self.advance(pending)
            }
            Mode::Collecting(mut pending) => {
                pending.args.push(byte);
                pending.remaining -= 1;
                self.advance(pending)
            }
        }
    }

    /// Feed a chunk of bytes, one framing step per byte
    pub fn feed_all(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|&b| self.feed(b)).collect()
    }

    fn advance(&mut self, pending: PendingCommand) -> Option<Frame> {
        if pending.remaining == 0 {
            Some(Frame::Request(pending.command.into_request(&pending.args)))
        } else {
            self.mode = Mode::Collecting(pending);
            None
        }
    }

    /// Check whether the next byte will be taken as a command byte
    pub fn is_attention(&self) -> bool {
        matches!(self.mode, Mode::Attention)
    }

    /// Get the command currently collecting arguments, if any
    pub fn pending(&self) -> Option<&PendingCommand> {
        match &self.mode {
            Mode::Collecting(pending) => Some(pending),
            _ => None,
        }
    }

    /// Current link state, given whether a transfer owns the side channel
    pub fn state(&self, side_channel_active: bool) -> LinkState {
        match self.mode {
            Mode::Attention => LinkState::AttentionSeen,
            Mode::Collecting(_) => LinkState::CollectingArgs,
            Mode::Idle if side_channel_active => LinkState::SideChannelActive,
            Mode::Idle => LinkState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{SectorAddress, SECTOR_LEN};

    #[test]
    fn test_plain_data() {
        let mut framer = Framer::new();
        assert_eq!(
            framer.feed_all(b"OK"),
            vec![Frame::Data(b'O'), Frame::Data(b'K')]
        );
        assert_eq!(framer.state(false), LinkState::Idle);
    }

    #[test]
    fn test_escaped_attention() {
        let mut framer = Framer::new();
        assert_eq!(framer.feed(0xFF), None);
        assert!(framer.is_attention());
        assert_eq!(framer.feed(0xFF), Some(Frame::Data(0xFF)));
        assert_eq!(framer.state(false), LinkState::Idle);
    }

    #[test]
    fn test_zero_arg_command() {
        let mut framer = Framer::new();
        let frames = framer.feed_all(&[0xFF, 0x01, b'A']);
        assert_eq!(
            frames,
            vec![Frame::Request(Request::Printer), Frame::Data(b'A')]
        );
    }

    #[test]
    fn test_unknown_command() {
        let mut framer = Framer::new();
        let frames = framer.feed_all(&[0xFF, 0x55, b'x']);
        assert_eq!(
            frames,
            vec![Frame::Request(Request::Unknown(0x55)), Frame::Data(b'x')]
        );
    }

    #[test]
    fn test_read_collects_args() {
        let mut framer = Framer::new();
        assert_eq!(framer.feed(0xFF), None);
        assert_eq!(framer.feed(0x10), None);
        assert_eq!(framer.state(false), LinkState::CollectingArgs);
        assert_eq!(framer.pending().map(|p| p.remaining), Some(3));

        assert_eq!(framer.feed(1), None);
        assert_eq!(framer.feed(2), None);
        assert_eq!(
            framer.feed(3),
            Some(Frame::Request(Request::DiskRead(SectorAddress::new(1, 2, 3))))
        );
        assert!(framer.pending().is_none());
    }

    #[test]
    fn test_attention_inside_args_is_data() {
        // 0xFF in an argument is a plain argument byte
        let mut framer = Framer::new();
        let frames = framer.feed_all(&[0xFF, 0x0F, 0xFF]);
        assert_eq!(frames, vec![Frame::Request(Request::DiskCheck { drive: 0xFF })]);
    }

    #[test]
    fn test_write_payload() {
        let mut framer = Framer::new();
        let mut bytes = vec![0xFF, 0x11, 0, 5, 6];
        bytes.extend(std::iter::repeat(0xFF).take(SECTOR_LEN));
        bytes.push(b'z');

        let frames = framer.feed_all(&bytes);
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0],
            Frame::Request(Request::DiskWrite {
                address: SectorAddress::new(0, 5, 6),
                data: vec![0xFF; SECTOR_LEN],
            })
        );
        assert_eq!(frames[1], Frame::Data(b'z'));
    }

    #[test]
    fn test_side_channel_state() {
        let mut framer = Framer::new();
        assert_eq!(framer.state(true), LinkState::SideChannelActive);
        framer.feed(0xFF);
        assert_eq!(framer.state(true), LinkState::AttentionSeen);
    }
}
