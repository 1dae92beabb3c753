/// Reader-side protocol session
///
/// One session per serial connection. It owns the framer and the display
/// sink, routes plain data, and answers disk commands on the link.

use crate::geometry::SECTOR_LEN;
use crate::link::Link;
use crate::protocol::{Frame, Framer, LinkState, Request, STATUS_ERROR, STATUS_OK};
use crate::transfer::{Direction, TransferService};
use log::{debug, warn};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

/// Size of a single read from the serial port
const READ_CHUNK: usize = 256;

/// Protocol session driven by the serial reader
pub struct Session {
    link: Arc<Link>,
    framer: Framer,
    display: Box<dyn Write + Send>,
    transfers: Option<TransferService>,
}

impl Session {
    /// Create a session on a link, echoing plain data to `display`
    pub fn new<D: Write + Send + 'static>(link: Arc<Link>, display: D) -> Self {
        Self {
            link,
            framer: Framer::new(),
            display: Box::new(display),
            transfers: None,
        }
    }

    /// Enable in-band transfer commands
    pub fn with_transfers(mut self, transfers: TransferService) -> Self {
        self.transfers = Some(transfers);
        self
    }

    /// The shared link
    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.framer.state(self.link.side_channel().is_active())
    }

    /// Read from the serial port until end of stream
    ///
    /// Read timeouts are expected on serial ports and simply poll again.
    pub fn run<R: Read>(&mut self, mut port: R) -> io::Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match port.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => self.receive(&buf[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Process a chunk of inbound bytes, one framing step per byte
    pub fn receive(&mut self, data: &[u8]) {
        for &byte in data {
            self.feed(byte);
        }
    }

    /// Process one inbound byte
    pub fn feed(&mut self, byte: u8) {
        let frame = self.framer.feed(byte);
        self.link.set_attention(self.framer.is_attention());

        match frame {
            Some(Frame::Data(byte)) => self.deliver(byte),
            Some(Frame::Request(request)) => self.dispatch(request),
            None => {}
        }
    }

    fn deliver(&mut self, byte: u8) {
        let side_channel = self.link.side_channel();
        if side_channel.is_active() {
            side_channel.push(byte);
            return;
        }
        let written = self
            .display
            .write_all(&[byte])
            .and_then(|_| self.display.flush());
        if let Err(e) = written {
            warn!("Display write failed: {}", e);
        }
    }

    fn dispatch(&mut self, request: Request) {
        match request {
            Request::Debug(byte) => debug!("Remote debug: {:#04x}", byte),
            Request::Printer | Request::Punch | Request::Reader => {
                debug!("Ignoring reserved request {:?}", request);
            }
            Request::Unknown(code) => debug!("Ignoring unknown command {:#04x}", code),
            Request::DiskCheck { drive } => {
                debug!("Disk check for drive {}", drive);
                let status = match self.link.drives().check(drive) {
                    Ok(()) => STATUS_OK,
                    Err(e) => {
                        warn!("Disk check failed for drive {}: {}", drive, e);
                        STATUS_ERROR
                    }
                };
                self.reply(&[status]);
            }
            Request::DiskRead(address) => {
                debug!("Read request for {}", address);
                let result = self.link.drives().read_sector(address);
                match result {
                    Ok(data) => {
                        let mut reply = Vec::with_capacity(1 + SECTOR_LEN);
                        reply.push(STATUS_OK);
                        reply.extend_from_slice(&data);
                        self.reply(&reply);
                    }
                    Err(e) => {
                        warn!("Read failed for {}: {}", address, e);
                        self.reply(&[STATUS_ERROR]);
                    }
                }
            }
            Request::DiskWrite { address, data } => {
                debug!("Write request for {}", address);
                let status = match self.link.drives().write_sector(address, &data) {
                    Ok(()) => STATUS_OK,
                    Err(e) => {
                        warn!("Write failed for {}: {}", address, e);
                        STATUS_ERROR
                    }
                };
                self.reply(&[status]);
            }
            Request::ReceiveFile => self.start_transfer(Direction::Receive),
            Request::SendFile => self.start_transfer(Direction::Send),
        }
    }

    fn start_transfer(&self, direction: Direction) {
        match self.transfers {
            // The worker runs detached; it releases the side channel when done
            Some(ref transfers) => {
                transfers.start(&self.link, direction);
            }
            None => warn!("No transfer handler, ignoring {} request", direction),
        }
    }

    fn reply(&self, bytes: &[u8]) {
        if let Err(e) = self.link.send(bytes) {
            warn!("Reply to remote failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("pending", &self.framer.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::create_blank;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn take(&self) -> Vec<u8> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn session() -> (Session, SharedBuf, SharedBuf) {
        let port = SharedBuf::default();
        let display = SharedBuf::default();
        let link = Arc::new(Link::new(port.clone()));
        (Session::new(link, display.clone()), port, display)
    }

    #[test]
    fn test_passthrough() {
        let (mut session, port, display) = session();
        session.receive(b"A>DIR\r\n");
        assert_eq!(display.take(), b"A>DIR\r\n");
        assert!(port.take().is_empty());
    }

    #[test]
    fn test_escape() {
        let (mut session, _port, display) = session();
        session.receive(&[0xFF, 0xFF]);
        assert_eq!(display.take(), vec![0xFF]);
    }

    #[test]
    fn test_attention_flag_tracks_framer() {
        let (mut session, _port, _display) = session();
        session.feed(0xFF);
        assert!(session.link().attention_pending());
        assert_eq!(session.state(), LinkState::AttentionSeen);
        session.feed(0x10);
        assert!(!session.link().attention_pending());
        assert_eq!(session.state(), LinkState::CollectingArgs);
    }

    #[test]
    fn test_check_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("cpm.dsk");
        create_blank(&image).unwrap();

        let (mut session, port, display) = session();
        session.link().mount(0, &image);

        session.receive(&[0xFF, 0x0F, 0]);
        assert_eq!(port.take(), vec![STATUS_OK]);

        session.receive(&[0xFF, 0x0F, 1]);
        assert_eq!(port.take(), vec![STATUS_ERROR]);

        session.receive(&[0xFF, 0x10, 0, 3, 4]);
        let reply = port.take();
        assert_eq!(reply.len(), 1 + SECTOR_LEN);
        assert_eq!(reply[0], STATUS_OK);
        assert!(reply[1..].iter().all(|&b| b == 0xE5));

        assert!(display.take().is_empty());
    }

    #[test]
    fn test_debug_and_reserved_are_silent() {
        let (mut session, port, display) = session();
        session.receive(&[0xFF, 0xFE, 0x42, 0xFF, 0x01, 0xFF, 0x02, 0xFF, 0x03, 0xFF, 0x99]);
        assert!(port.take().is_empty());
        assert!(display.take().is_empty());
        assert_eq!(session.state(), LinkState::Idle);
    }

    #[test]
    fn test_transfer_without_handler() {
        let (mut session, _port, _display) = session();
        session.receive(&[0xFF, 0x12]);
        assert!(!session.link().side_channel().is_active());
    }

    #[test]
    fn test_side_channel_routing() {
        let (mut session, _port, display) = session();
        let guard = session.link().side_channel().try_activate().unwrap();
        assert_eq!(session.state(), LinkState::SideChannelActive);

        session.receive(&[0x01, 0xFF, 0xFF, 0x15]);
        assert!(display.take().is_empty());
        assert_eq!(
            session.link().side_channel().read(3, std::time::Duration::ZERO),
            Some(vec![0x01, 0xFF, 0x15])
        );

        drop(guard);
        session.receive(b"x");
        assert_eq!(display.take(), b"x");
    }

    #[test]
    fn test_run_until_eof() {
        let (mut session, _port, display) = session();
        session.run(&b"hello"[..]).unwrap();
        assert_eq!(display.take(), b"hello");
    }
}
