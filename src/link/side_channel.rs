/// Side channel for block transfers
///
/// While a transfer is active the reader diverts plain inbound data into a
/// queue; the transfer worker drains it through [`SideChannelBridge`] and
/// writes straight to the serial port.

use crate::link::Link;
use crate::transfer::Channel;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Queue of inbound transfer bytes plus the activation flag
#[derive(Debug, Default)]
pub struct SideChannel {
    active: AtomicBool,
    queue: Mutex<VecDeque<u8>>,
    arrived: Condvar,
}

impl SideChannel {
    /// Create an inactive side channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a transfer owns the side channel
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claim the side channel for a transfer
    ///
    /// Returns `None` if another transfer already holds it. The queue starts
    /// empty and is released when the guard drops.
    pub fn try_activate(self: &Arc<Self>) -> Option<SideChannelGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.lock().clear();
        Some(SideChannelGuard {
            channel: Arc::clone(self),
        })
    }

    fn release(&self) {
        self.lock().clear();
        self.active.store(false, Ordering::Release);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<u8>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an inbound byte
    pub fn push(&self, byte: u8) {
        self.lock().push_back(byte);
        self.arrived.notify_all();
    }

    /// Append several inbound bytes
    pub fn extend(&self, bytes: &[u8]) {
        self.lock().extend(bytes.iter().copied());
        self.arrived.notify_all();
    }

    /// Number of bytes waiting in the queue
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Take exactly `size` bytes, waiting up to `timeout` for them to arrive
    ///
    /// Returns `None` on timeout, leaving any partial data queued.
    pub fn read(&self, size: usize, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock();
        loop {
            if queue.len() >= size {
                return Some(queue.drain(..size).collect());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            queue = self
                .arrived
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Exclusive claim on the side channel; releases it on drop
#[derive(Debug)]
pub struct SideChannelGuard {
    channel: Arc<SideChannel>,
}

impl Drop for SideChannelGuard {
    fn drop(&mut self) {
        self.channel.release();
    }
}

/// Transfer-facing view of the link: queued reads, direct port writes
#[derive(Debug, Clone)]
pub struct SideChannelBridge {
    link: Arc<Link>,
}

impl SideChannelBridge {
    /// Create a bridge over a link
    pub fn new(link: Arc<Link>) -> Self {
        Self { link }
    }
}

impl Channel for SideChannelBridge {
    fn read(&self, size: usize, timeout: Duration) -> Option<Vec<u8>> {
        self.link.side_channel().read(size, timeout)
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        self.link.send(data)
    }
}
