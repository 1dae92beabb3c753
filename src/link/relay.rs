/// Local keystroke relay
///
/// Keystrokes go straight to the serial port except in the one-byte window
/// after the remote sends an attention byte, where a local byte would be
/// mistaken for the command byte. Argument collection is not gated.

use crate::link::Link;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Ctrl-] opens the operator menu
pub const MENU_KEY: u8 = 0x1D;

/// How long to sleep between attention checks
const ATTENTION_POLL: Duration = Duration::from_millis(1);

/// What the relay did with a keystroke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystroke {
    /// Sent to the remote
    Forwarded,
    /// The menu key; nothing was sent
    Menu,
}

/// Forwards local input to the serial link
#[derive(Debug, Clone)]
pub struct Relay {
    link: Arc<Link>,
    menu_key: u8,
}

impl Relay {
    /// Create a relay for a link using Ctrl-] as the menu key
    pub fn new(link: Arc<Link>) -> Self {
        Self {
            link,
            menu_key: MENU_KEY,
        }
    }

    /// Use a different menu key
    pub fn with_menu_key(mut self, key: u8) -> Self {
        self.menu_key = key;
        self
    }

    /// Handle one local keystroke
    pub fn key(&self, byte: u8) -> io::Result<Keystroke> {
        if byte == self.menu_key {
            return Ok(Keystroke::Menu);
        }
        while self.link.attention_pending() {
            thread::sleep(ATTENTION_POLL);
        }
        self.link.send(&[byte])?;
        Ok(Keystroke::Forwarded)
    }

    /// Send bytes to the remote without menu-key handling
    pub fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
        self.link.send(bytes)
    }

    /// Check if local input belongs to a transfer right now
    pub fn suspended(&self) -> bool {
        self.link.side_channel().is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_forward() {
        let port = SharedBuf::default();
        let relay = Relay::new(Arc::new(Link::new(port.clone())));

        assert_eq!(relay.key(b'd').unwrap(), Keystroke::Forwarded);
        assert_eq!(relay.key(0xFF).unwrap(), Keystroke::Forwarded);
        assert_eq!(*port.0.lock().unwrap(), vec![b'd', 0xFF]);
    }

    #[test]
    fn test_menu_key_not_forwarded() {
        let port = SharedBuf::default();
        let relay = Relay::new(Arc::new(Link::new(port.clone())));

        assert_eq!(relay.key(MENU_KEY).unwrap(), Keystroke::Menu);
        assert!(port.0.lock().unwrap().is_empty());

        let relay = relay.with_menu_key(0x01);
        assert_eq!(relay.key(MENU_KEY).unwrap(), Keystroke::Forwarded);
        assert_eq!(relay.key(0x01).unwrap(), Keystroke::Menu);
    }

    #[test]
    fn test_waits_out_attention() {
        let port = SharedBuf::default();
        let link = Arc::new(Link::new(port.clone()));
        link.set_attention(true);

        let relay = Relay::new(Arc::clone(&link));
        let handle = thread::spawn(move || relay.key(b'q'));

        thread::sleep(Duration::from_millis(50));
        assert!(port.0.lock().unwrap().is_empty());

        link.set_attention(false);
        assert_eq!(handle.join().unwrap().unwrap(), Keystroke::Forwarded);
        assert_eq!(*port.0.lock().unwrap(), vec![b'q']);
    }

    #[test]
    fn test_suspended_during_transfer() {
        let relay = Relay::new(Arc::new(Link::new(io::sink())));
        assert!(!relay.suspended());
        let _guard = relay.link.side_channel().try_activate().unwrap();
        assert!(relay.suspended());
    }
}
