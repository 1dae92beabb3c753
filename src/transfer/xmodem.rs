/// XMODEM block transfer
///
/// Blocks are sent as 128-byte SOH packets padded with SUB (0x1A). On
/// receive, 1K STX packets are accepted too. The receiver picks the check:
/// it asks for CRC-16 with 'C' and falls back to an additive checksum (NAK)
/// after half its retries go unanswered.

use crate::error::{DriveError, Result};
use crate::transfer::{BlockTransfer, Channel};
use log::debug;
use std::io::{Read, Write};
use std::time::Duration;

/// Start of 128-byte block
pub const SOH: u8 = 0x01;

/// Start of 1024-byte block
pub const STX: u8 = 0x02;

/// End of transmission
pub const EOT: u8 = 0x04;

/// Acknowledge
pub const ACK: u8 = 0x06;

/// Negative acknowledge; also requests checksum mode
pub const NAK: u8 = 0x15;

/// Cancel (two in a row abort the transfer)
pub const CAN: u8 = 0x18;

/// Requests CRC-16 mode
pub const CRC: u8 = b'C';

/// Padding for the final short block
pub const SUB: u8 = 0x1A;

/// Payload of a SOH block
pub const BLOCK_LEN: usize = 128;

/// Payload of a STX block
pub const BLOCK_1K_LEN: usize = 1024;

/// Default number of retries per stage
pub const DEFAULT_RETRY: usize = 8;

/// Default wait for each reply or packet
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest quiet gap while discarding line noise
const PURGE_TIMEOUT: Duration = Duration::from_millis(100);

/// CRC-16/XMODEM (poly 0x1021, initial value 0)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Additive 8-bit checksum
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// XMODEM sender and receiver
#[derive(Debug, Clone)]
pub struct Xmodem {
    retry: usize,
    timeout: Duration,
}

impl Default for Xmodem {
    fn default() -> Self {
        Self {
            retry: DEFAULT_RETRY,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Xmodem {
    /// Create with the default retry budget and timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry budget per stage
    pub fn with_retry(mut self, retry: usize) -> Self {
        self.retry = retry;
        self
    }

    /// Set the wait for each reply or packet
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn read_byte(&self, channel: &dyn Channel) -> Option<u8> {
        channel.read(1, self.timeout).map(|b| b[0])
    }

    /// Discard inbound bytes until the line goes quiet
    fn purge(&self, channel: &dyn Channel) {
        let quiet = self.timeout.min(PURGE_TIMEOUT);
        let mut dropped = 0;
        while channel.read(1, quiet).is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Discarded {} stray bytes", dropped);
        }
    }

    fn abort(&self, channel: &dyn Channel) {
        let _ = channel.write(&[CAN, CAN]);
    }

    fn packet(seq: u8, block: &[u8], crc_mode: bool) -> Vec<u8> {
        let mut packet = Vec::with_capacity(block.len() + 5);
        packet.push(if block.len() == BLOCK_1K_LEN { STX } else { SOH });
        packet.push(seq);
        packet.push(!seq);
        packet.extend_from_slice(block);
        if crc_mode {
            packet.extend_from_slice(&crc16(block).to_be_bytes());
        } else {
            packet.push(checksum(block));
        }
        packet
    }

    /// Wait for the receiver's mode request; true means CRC-16
    fn negotiate(&self, channel: &dyn Channel) -> Result<bool> {
        let mut cancels = 0;
        for _ in 0..=self.retry {
            match self.read_byte(channel) {
                Some(NAK) => return Ok(false),
                Some(CRC) => return Ok(true),
                Some(CAN) => {
                    cancels += 1;
                    if cancels >= 2 {
                        return Err(DriveError::cancelled("receiver cancelled"));
                    }
                }
                other => debug!("Expected NAK or C, got {:?}", other),
            }
        }
        Err(DriveError::retries("start", self.retry + 1))
    }

    /// Send one packet until it is acknowledged
    fn send_packet(&self, channel: &dyn Channel, packet: &[u8]) -> Result<()> {
        let mut cancels = 0;
        for _ in 0..=self.retry {
            channel.write(packet)?;
            match self.read_byte(channel) {
                Some(ACK) => return Ok(()),
                Some(CAN) => {
                    cancels += 1;
                    if cancels >= 2 {
                        return Err(DriveError::cancelled("receiver cancelled"));
                    }
                }
                other => debug!("Block {} not acknowledged: {:?}", packet[1], other),
            }
        }
        self.abort(channel);
        Err(DriveError::retries("block", self.retry + 1))
    }
}

/// Fill `buf` from `source` until full or end of input
fn read_block(source: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl BlockTransfer for Xmodem {
    fn send(&self, channel: &dyn Channel, source: &mut dyn Read) -> Result<u64> {
        let crc_mode = self.negotiate(channel)?;
        debug!("Sending in {} mode", if crc_mode { "CRC" } else { "checksum" });

        let mut seq: u8 = 1;
        let mut total = 0u64;
        let mut block = [SUB; BLOCK_LEN];
        loop {
            block.fill(SUB);
            let n = read_block(source, &mut block)?;
            if n == 0 {
                break;
            }
            self.send_packet(channel, &Self::packet(seq, &block, crc_mode))?;
            total += n as u64;
            seq = seq.wrapping_add(1);
            if n < BLOCK_LEN {
                break;
            }
        }

        for _ in 0..=self.retry {
            channel.write(&[EOT])?;
            if self.read_byte(channel) == Some(ACK) {
                return Ok(total);
            }
        }
        Err(DriveError::retries("end of transmission", self.retry + 1))
    }

    fn receive(&self, channel: &dyn Channel, sink: &mut dyn Write) -> Result<u64> {
        let mut crc_mode = true;
        let mut errors = 0;
        let mut cancels = 0;

        // Ask for CRC, then checksum, until the sender starts
        let mut header = loop {
            channel.write(&[if crc_mode { CRC } else { NAK }])?;
            match self.read_byte(channel) {
                Some(b @ (SOH | STX | EOT)) => break b,
                Some(CAN) => {
                    cancels += 1;
                    if cancels >= 2 {
                        return Err(DriveError::cancelled("sender cancelled"));
                    }
                }
                _ => {
                    errors += 1;
                    if errors >= self.retry / 2 {
                        crc_mode = false;
                    }
                    if errors > self.retry {
                        self.abort(channel);
                        return Err(DriveError::retries("start", errors));
                    }
                }
            }
        };

        let mut expected: u8 = 1;
        let mut total = 0u64;
        errors = 0;
        loop {
            match header {
                SOH | STX => {
                    let size = if header == STX { BLOCK_1K_LEN } else { BLOCK_LEN };
                    let check_len = if crc_mode { 2 } else { 1 };
                    match channel.read(2 + size + check_len, self.timeout) {
                        Some(body) => {
                            let (seq, inverse) = (body[0], body[1]);
                            let data = &body[2..2 + size];
                            let check = &body[2 + size..];
                            let valid = seq == !inverse
                                && if crc_mode {
                                    check[..] == crc16(data).to_be_bytes()[..]
                                } else {
                                    check[0] == checksum(data)
                                };

                            if valid && seq == expected {
                                sink.write_all(data)?;
                                total += size as u64;
                                expected = expected.wrapping_add(1);
                                errors = 0;
                                channel.write(&[ACK])?;
                            } else if valid && seq == expected.wrapping_sub(1) {
                                debug!("Duplicate block {}", seq);
                                channel.write(&[ACK])?;
                            } else {
                                debug!("Bad block {} (expected {})", seq, expected);
                                errors += 1;
                                self.purge(channel);
                                channel.write(&[NAK])?;
                            }
                        }
                        None => {
                            debug!("Short block {}", expected);
                            errors += 1;
                            self.purge(channel);
                            channel.write(&[NAK])?;
                        }
                    }
                }
                EOT => {
                    channel.write(&[ACK])?;
                    return Ok(total);
                }
                CAN => {
                    cancels += 1;
                    if cancels >= 2 {
                        return Err(DriveError::cancelled("sender cancelled"));
                    }
                }
                other => {
                    debug!("Unexpected header byte {:#04x}", other);
                    errors += 1;
                    self.purge(channel);
                    channel.write(&[NAK])?;
                }
            }

            if errors > self.retry {
                self.abort(channel);
                return Err(DriveError::retries("block", errors));
            }

            header = loop {
                match self.read_byte(channel) {
                    Some(b) => break b,
                    None => {
                        errors += 1;
                        if errors > self.retry {
                            self.abort(channel);
                            return Err(DriveError::retries("block header", errors));
                        }
                        channel.write(&[NAK])?;
                    }
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SideChannel;
    use std::io;
    use std::sync::Arc;
    use std::thread;

    /// One end of a crossed pair of queues
    struct Pipe {
        inbox: Arc<SideChannel>,
        outbox: Arc<SideChannel>,
    }

    impl Channel for Pipe {
        fn read(&self, size: usize, timeout: Duration) -> Option<Vec<u8>> {
            self.inbox.read(size, timeout)
        }

        fn write(&self, data: &[u8]) -> io::Result<()> {
            self.outbox.extend(data);
            Ok(())
        }
    }

    fn pipes() -> (Pipe, Pipe) {
        let a = Arc::new(SideChannel::new());
        let b = Arc::new(SideChannel::new());
        (
            Pipe {
                inbox: Arc::clone(&a),
                outbox: Arc::clone(&b),
            },
            Pipe { inbox: b, outbox: a },
        )
    }

    fn xmodem() -> Xmodem {
        Xmodem::new().with_timeout(Duration::from_millis(500))
    }

    #[test]
    fn test_crc16() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[0x80, 0x80, 0x01]), 0x01);
    }

    #[test]
    fn test_packet_layout() {
        let block = [0x41u8; BLOCK_LEN];
        let packet = Xmodem::packet(3, &block, false);
        assert_eq!(packet.len(), 3 + BLOCK_LEN + 1);
        assert_eq!(&packet[..3], &[SOH, 3, 0xFC]);
        assert_eq!(packet[BLOCK_LEN + 3], checksum(&block));

        let packet = Xmodem::packet(3, &block, true);
        assert_eq!(packet.len(), 3 + BLOCK_LEN + 2);
    }

    #[test]
    fn test_transfer_between_peers() {
        let (sender_end, receiver_end) = pipes();
        let data: Vec<u8> = (0..300u32).map(|i| (i * 7) as u8).collect();
        let source = data.clone();

        let sender = thread::spawn(move || xmodem().send(&sender_end, &mut &source[..]));

        let mut received = Vec::new();
        let stored = xmodem().receive(&receiver_end, &mut received).unwrap();
        let sent = sender.join().unwrap().unwrap();

        assert_eq!(sent, 300);
        assert_eq!(stored, 3 * BLOCK_LEN as u64);
        assert_eq!(&received[..300], &data[..]);
        assert!(received[300..].iter().all(|&b| b == SUB));
    }

    #[test]
    fn test_empty_file() {
        let (sender_end, receiver_end) = pipes();
        let sender = thread::spawn(move || xmodem().send(&sender_end, &mut io::empty()));

        let mut received = Vec::new();
        assert_eq!(xmodem().receive(&receiver_end, &mut received).unwrap(), 0);
        assert_eq!(sender.join().unwrap().unwrap(), 0);
        assert!(received.is_empty());
    }

    #[test]
    fn test_checksum_mode_sender() {
        // A receiver that only speaks checksum mode
        let (sender_end, remote) = pipes();
        let sender = thread::spawn(move || xmodem().send(&sender_end, &mut &b"HELLO"[..]));

        remote.write(&[NAK]).unwrap();
        let packet = remote.read(3 + BLOCK_LEN + 1, Duration::from_secs(5)).unwrap();
        assert_eq!(&packet[..3], &[SOH, 1, 0xFE]);
        assert_eq!(&packet[3..8], b"HELLO");
        assert_eq!(packet[BLOCK_LEN + 3], checksum(&packet[3..3 + BLOCK_LEN]));
        remote.write(&[ACK]).unwrap();

        assert_eq!(remote.read(1, Duration::from_secs(5)), Some(vec![EOT]));
        remote.write(&[ACK]).unwrap();
        assert_eq!(sender.join().unwrap().unwrap(), 5);
    }

    #[test]
    fn test_receiver_cancelled() {
        let (sender_end, remote) = pipes();
        remote.write(&[CAN, CAN]).unwrap();
        assert!(matches!(
            xmodem().send(&sender_end, &mut &b"data"[..]),
            Err(DriveError::Cancelled(_))
        ));
    }

    #[test]
    fn test_silent_receiver_exhausts_retries() {
        let (sender_end, _remote) = pipes();
        let quick = Xmodem::new()
            .with_retry(2)
            .with_timeout(Duration::from_millis(10));
        assert!(matches!(
            quick.send(&sender_end, &mut &b"data"[..]),
            Err(DriveError::RetriesExhausted { stage: "start", attempts: 3 })
        ));
    }

    fn wait() -> Duration {
        Duration::from_secs(5)
    }

    #[test]
    fn test_receive_recovers_from_short_block() {
        let (receiver_end, remote) = pipes();
        let receiver = thread::spawn(move || {
            let mut received = Vec::new();
            xmodem().receive(&receiver_end, &mut received).map(|n| (n, received))
        });

        assert_eq!(remote.read(1, wait()), Some(vec![CRC]));
        let block = [0x5Au8; BLOCK_LEN];
        let packet = Xmodem::packet(1, &block, true);

        // Last CRC byte lost on the line
        remote.write(&packet[..packet.len() - 1]).unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![NAK]));

        remote.write(&packet).unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![ACK]));
        remote.write(&[EOT]).unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![ACK]));

        let (stored, received) = receiver.join().unwrap().unwrap();
        assert_eq!(stored, BLOCK_LEN as u64);
        assert_eq!(received, block.to_vec());
    }

    #[test]
    fn test_receive_discards_noise_before_header() {
        let (receiver_end, remote) = pipes();
        let receiver = thread::spawn(move || xmodem().receive(&receiver_end, &mut Vec::new()));

        assert_eq!(remote.read(1, wait()), Some(vec![CRC]));
        remote.write(&Xmodem::packet(1, &[0u8; BLOCK_LEN], true)).unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![ACK]));

        remote.write(b"noise").unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![NAK]));
        remote.write(&[EOT]).unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![ACK]));

        assert_eq!(receiver.join().unwrap().unwrap(), BLOCK_LEN as u64);
    }

    #[test]
    fn test_receive_1k_block_and_duplicate() {
        let (receiver_end, remote) = pipes();
        let receiver = thread::spawn(move || {
            let mut received = Vec::new();
            xmodem().receive(&receiver_end, &mut received).map(|n| (n, received))
        });

        assert_eq!(remote.read(1, wait()), Some(vec![CRC]));
        let block: Vec<u8> = (0..BLOCK_1K_LEN).map(|i| i as u8).collect();
        let packet = Xmodem::packet(1, &block, true);
        assert_eq!(packet[0], STX);

        remote.write(&packet).unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![ACK]));

        // Sender missed the ACK and repeats the block
        remote.write(&packet).unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![ACK]));

        remote.write(&[EOT]).unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![ACK]));

        let (stored, received) = receiver.join().unwrap().unwrap();
        assert_eq!(stored, BLOCK_1K_LEN as u64);
        assert_eq!(received, block);
    }

    #[test]
    fn test_receive_falls_back_to_checksum() {
        let (receiver_end, remote) = pipes();
        let receiver = thread::spawn(move || {
            let quick = Xmodem::new()
                .with_retry(4)
                .with_timeout(Duration::from_millis(200));
            let mut received = Vec::new();
            quick.receive(&receiver_end, &mut received).map(|n| (n, received))
        });

        // A checksum-only sender ignores 'C' until the receiver gives up on CRC
        let mut requests = Vec::new();
        loop {
            let byte = remote.read(1, wait()).expect("mode request")[0];
            requests.push(byte);
            if byte == NAK {
                break;
            }
        }
        assert_eq!(requests, vec![CRC, CRC, NAK]);

        let block = [0x33u8; BLOCK_LEN];
        remote.write(&Xmodem::packet(1, &block, false)).unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![ACK]));
        remote.write(&[EOT]).unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![ACK]));

        let (stored, received) = receiver.join().unwrap().unwrap();
        assert_eq!(stored, BLOCK_LEN as u64);
        assert_eq!(received, block.to_vec());
    }

    #[test]
    fn test_sender_cancelled_mid_transfer() {
        let (receiver_end, remote) = pipes();
        let receiver = thread::spawn(move || xmodem().receive(&receiver_end, &mut Vec::new()));

        assert_eq!(remote.read(1, wait()), Some(vec![CRC]));
        remote.write(&Xmodem::packet(1, &[1u8; BLOCK_LEN], true)).unwrap();
        assert_eq!(remote.read(1, wait()), Some(vec![ACK]));
        remote.write(&[CAN, CAN]).unwrap();

        assert!(matches!(
            receiver.join().unwrap(),
            Err(DriveError::Cancelled(_))
        ));
    }
}
