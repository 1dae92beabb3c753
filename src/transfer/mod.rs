/// Block transfers over the side channel

/// XMODEM block transfer
pub mod xmodem;

pub use xmodem::Xmodem;

use crate::error::{DriveError, Result};
use crate::link::{Link, SideChannelBridge};
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Transfer direction, seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The remote sends a file to the host
    Receive,
    /// The host sends a file to the remote
    Send,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Receive => write!(f, "receive"),
            Direction::Send => write!(f, "send"),
        }
    }
}

/// Byte primitives a block transfer runs on
pub trait Channel {
    /// Read exactly `size` bytes, or `None` if they do not arrive in time
    fn read(&self, size: usize, timeout: Duration) -> Option<Vec<u8>>;

    /// Write bytes to the remote and flush
    fn write(&self, data: &[u8]) -> io::Result<()>;
}

/// A block transfer protocol
pub trait BlockTransfer: Send + Sync {
    /// Receive a file from the remote into `sink`, returning bytes stored
    fn receive(&self, channel: &dyn Channel, sink: &mut dyn Write) -> Result<u64>;

    /// Send `source` to the remote, returning bytes sent
    fn send(&self, channel: &dyn Channel, source: &mut dyn Read) -> Result<u64>;
}

/// Chooses the local file for a transfer
pub trait FilePicker: Send + Sync {
    /// Ask for a path; `None` abandons the transfer
    fn pick(&self, direction: Direction) -> Option<PathBuf>;
}

/// Starts transfers on worker threads
#[derive(Clone)]
pub struct TransferService {
    protocol: Arc<dyn BlockTransfer>,
    picker: Arc<dyn FilePicker>,
}

impl TransferService {
    /// Create a service from a protocol and a file picker
    pub fn new<T, P>(protocol: T, picker: P) -> Self
    where
        T: BlockTransfer + 'static,
        P: FilePicker + 'static,
    {
        Self {
            protocol: Arc::new(protocol),
            picker: Arc::new(picker),
        }
    }

    /// Claim the side channel and run a transfer on a new thread
    ///
    /// Returns `None` without spawning if a transfer is already active.
    pub fn start(&self, link: &Arc<Link>, direction: Direction) -> Option<JoinHandle<()>> {
        let Some(guard) = link.side_channel().try_activate() else {
            warn!("Transfer already active, ignoring {} request", direction);
            return None;
        };
        info!("Starting {} transfer", direction);

        let service = self.clone();
        let bridge = SideChannelBridge::new(Arc::clone(link));
        let spawned = thread::Builder::new()
            .name(format!("{}-transfer", direction))
            .spawn(move || {
                let _guard = guard;
                match service.run(&bridge, direction) {
                    Ok(bytes) => info!("Transfer ({}) complete: {} bytes", direction, bytes),
                    Err(e) => warn!("Transfer ({}) failed: {}", direction, e),
                }
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Could not start transfer thread: {}", e);
                None
            }
        }
    }

    /// Pick a file and run the transfer on the calling thread
    ///
    /// Keeps asking until a file opens; the picker returning `None` cancels.
    pub fn run(&self, channel: &dyn Channel, direction: Direction) -> Result<u64> {
        loop {
            let Some(path) = self.picker.pick(direction) else {
                return Err(DriveError::cancelled("no file chosen"));
            };

            match direction {
                Direction::Receive => match File::create(&path) {
                    Ok(mut file) => {
                        let bytes = self.protocol.receive(channel, &mut file)?;
                        file.sync_all()?;
                        return Ok(bytes);
                    }
                    Err(e) => warn!("Cannot create {}: {}", path.display(), e),
                },
                Direction::Send => match File::open(&path) {
                    Ok(file) => {
                        let mut source = BufReader::new(file);
                        return self.protocol.send(channel, &mut source);
                    }
                    Err(e) => warn!("Cannot open {}: {}", path.display(), e),
                },
            }
        }
    }
}

impl std::fmt::Debug for TransferService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferService").finish_non_exhaustive()
    }
}
