/// Serial link: shared state, session, side channel and keyboard relay

/// Local keystroke relay
pub mod relay;
/// Reader-side protocol session
pub mod session;
/// Side channel queue for block transfers
pub mod side_channel;

pub use relay::{Keystroke, Relay, MENU_KEY};
pub use session::Session;
pub use side_channel::{SideChannel, SideChannelBridge, SideChannelGuard};

use crate::drive::DriveTable;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

/// State shared by every context on one serial connection
///
/// The reader thread owns the [`Session`] and updates the attention flag,
/// the relay loop forwards keystrokes, transfer workers use the side channel,
/// and the menu mounts and unmounts drives.
pub struct Link {
    port: Mutex<Box<dyn Write + Send>>,
    drives: RwLock<DriveTable>,
    attention: AtomicBool,
    side_channel: Arc<SideChannel>,
}

impl Link {
    /// Create a link writing to the given serial port handle
    pub fn new<W: Write + Send + 'static>(port: W) -> Self {
        Self::with_drives(port, DriveTable::new())
    }

    /// Create a link with a pre-populated drive table
    pub fn with_drives<W: Write + Send + 'static>(port: W, drives: DriveTable) -> Self {
        Self {
            port: Mutex::new(Box::new(port)),
            drives: RwLock::new(drives),
            attention: AtomicBool::new(false),
            side_channel: Arc::new(SideChannel::new()),
        }
    }

    /// Write bytes to the serial port and flush
    ///
    /// Holding the port lock keeps a reply contiguous with respect to relayed
    /// keystrokes and transfer blocks.
    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut port = self.port.lock().unwrap_or_else(PoisonError::into_inner);
        port.write_all(bytes)?;
        port.flush()
    }

    /// Read access to the drive table
    pub fn drives(&self) -> RwLockReadGuard<'_, DriveTable> {
        self.drives.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind an image file to a drive slot
    pub fn mount<P: Into<PathBuf>>(&self, drive: u8, path: P) {
        let path = path.into();
        log::info!("Mounting {} as drive {}", path.display(), drive);
        self.drives
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .mount(drive, path);
    }

    /// Remove a drive slot binding, returning the old path
    pub fn unmount(&self, drive: u8) -> Option<PathBuf> {
        let old = self
            .drives
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unmount(drive);
        if let Some(ref path) = old {
            log::info!("Unmounted drive {} ({})", drive, path.display());
        }
        old
    }

    /// Snapshot of the mounted drives
    pub fn mounted(&self) -> Vec<(u8, PathBuf)> {
        self.drives()
            .mounted()
            .map(|(d, p)| (d, p.to_path_buf()))
            .collect()
    }

    /// Check whether the remote has sent an attention byte but no command yet
    pub fn attention_pending(&self) -> bool {
        self.attention.load(Ordering::Acquire)
    }

    pub(crate) fn set_attention(&self, pending: bool) {
        self.attention.store(pending, Ordering::Release);
    }

    /// The side channel used by block transfers
    pub fn side_channel(&self) -> &Arc<SideChannel> {
        &self.side_channel
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("drives", &*self.drives())
            .field("attention", &self.attention_pending())
            .field("side_channel_active", &self.side_channel.is_active())
            .finish()
    }
}
