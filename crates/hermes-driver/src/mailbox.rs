//! UDP to mailbox bridge
//!
//! Relays each UDP datagram into the firmware's page mailbox and sends the
//! firmware's reply back to the sender.
//!
//! # Transaction
//!
//! ```text
//! datagram ──► LE words ──► snapshot status ──► header + payload into page
//!                                                        │
//! sender ◄── LE bytes ◄── reply payload ◄── reply header ◄── num_replies moved
//! ```
//!
//! Transactions are strictly one at a time. The page slot is chosen by the
//! firmware's single `next_request_page` cursor; starting a second request
//! before the first reply is drained would let the firmware move the cursor
//! under us.

use crate::access::RegisterAccess;
use crate::backend::WordSpace;
use crate::error::{HalError, Result};
use hermes_regs::mailbox::{self, MailboxLayout, MailboxStatus, STATUS_WORDS};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Largest datagram accepted by the reference deployment
pub const MAX_DATAGRAM: usize = 2048;

/// Default UDP port of the bridge
pub const DEFAULT_PORT: u16 = 50001;

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Mailbox placement in the window
    pub layout: MailboxLayout,

    /// Receive buffer size; longer datagrams are truncated by the socket
    pub max_datagram: usize,

    /// First sleep between `num_replies` polls
    pub poll_interval: Duration,

    /// Upper bound for the doubling poll interval
    pub max_poll_interval: Duration,

    /// Give up on the firmware after this long
    pub completion_timeout: Duration,

    /// Send-side timeout for the UDP reply
    pub reply_timeout: Duration,

    /// Wait for `num_replies` to move before reading the reply page
    pub check_replies: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            layout: MailboxLayout::default(),
            max_datagram: MAX_DATAGRAM,
            poll_interval: Duration::from_micros(50),
            max_poll_interval: Duration::from_millis(1),
            completion_timeout: Duration::from_secs(1),
            reply_timeout: Duration::from_secs(1),
            check_replies: true,
        }
    }
}

/// Running transaction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Datagrams received
    pub requests: u64,
    /// Replies sent
    pub replies: u64,
    /// Transactions abandoned waiting for the firmware
    pub timeouts: u64,
    /// Transactions failed for any other reason
    pub errors: u64,
}

/// Reinterpret bytes as little-endian words
///
/// A trailing partial word is dropped.
pub fn words_from_le_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Flatten words into little-endian bytes
pub fn words_to_le_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// UDP to mailbox bridge over a shared register window
#[derive(Debug)]
pub struct MailboxBridge<S> {
    hw: Arc<RegisterAccess<S>>,
    config: BridgeConfig,
    stats: BridgeStats,
    buf: Vec<u8>,
}

impl<S: WordSpace> MailboxBridge<S> {
    /// Create a bridge
    pub fn new(hw: Arc<RegisterAccess<S>>, config: BridgeConfig) -> Self {
        let buf = vec![0; config.max_datagram];
        Self {
            hw,
            config,
            stats: BridgeStats::default(),
            buf,
        }
    }

    /// Configuration in use
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Counters so far
    pub const fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Register window
    pub fn hardware(&self) -> &Arc<RegisterAccess<S>> {
        &self.hw
    }

    /// Read the four status words as one group
    ///
    /// # Errors
    ///
    /// Returns error if the status block is outside the window.
    pub fn status(&self) -> Result<MailboxStatus> {
        let mut raw = [0u32; STATUS_WORDS];
        self.hw.lock().read_block(self.config.layout.base, &mut raw)?;
        Ok(MailboxStatus::from_words(raw))
    }

    /// Run one request through the mailbox and return the reply bytes
    ///
    /// # Errors
    ///
    /// - [`HalError::InvalidDatagram`] for an empty request or one larger
    ///   than a page
    /// - [`HalError::MailboxTimeout`] if the firmware does not answer
    /// - [`HalError::InvalidPageHeader`] if the reply page has no valid header
    /// - [`HalError::OutOfRange`] if a page lies outside the window
    pub fn transact(&self, request: &[u8]) -> Result<Vec<u8>> {
        let layout = &self.config.layout;

        if request.len() % 4 != 0 {
            warn!(
                "Datagram of {} bytes is not word aligned, dropping {} trailing bytes",
                request.len(),
                request.len() % 4
            );
        }
        let words = words_from_le_bytes(request);
        let header = mailbox::encode_header(words.len())
            .ok_or_else(|| HalError::invalid_datagram("no complete 32-bit word"))?;

        let status = self.status()?;
        debug!(?status, "Mailbox status before request");

        if words.len() > status.page_capacity() {
            return Err(HalError::invalid_datagram(format!(
                "{} words do not fit a {}-word page",
                words.len(),
                status.words_per_page
            )));
        }

        let request_base = status
            .request_base(layout)
            .ok_or_else(|| page_overflow(&status))?;

        debug!(
            "Request of {} words into page {} at {request_base:#x}",
            words.len(),
            status.next_request_page
        );
        // Header and payload land in one locked block write.
        let mut page = Vec::with_capacity(words.len() + 1);
        page.push(header);
        page.extend_from_slice(&words);
        self.hw.write_block(request_base, &page)?;

        if self.config.check_replies {
            self.wait_for_reply(status.num_replies)?;
        }

        let reply_base = status
            .reply_base(layout)
            .ok_or_else(|| page_overflow(&status))?;
        let reply_header = self.hw.read_word(reply_base)?;
        let reply_len = mailbox::decode_header(reply_header)
            .filter(|&n| n <= status.page_capacity())
            .ok_or(HalError::InvalidPageHeader {
                addr: reply_base,
                word: reply_header,
            })?;

        let reply = self.hw.read_block(reply_base.saturating_add(1), reply_len)?;
        debug!("Reply of {reply_len} words from {reply_base:#x}");

        Ok(words_to_le_bytes(&reply))
    }

    /// Poll `num_replies` until it differs from `before`
    fn wait_for_reply(&self, before: u32) -> Result<u32> {
        let addr = self.config.layout.num_replies_address();
        let start = Instant::now();
        let mut interval = self.config.poll_interval;

        loop {
            let now = self.hw.read_word(addr)?;
            if now != before {
                return Ok(now);
            }

            if start.elapsed() >= self.config.completion_timeout {
                return Err(HalError::MailboxTimeout {
                    duration_ms: u64::try_from(self.config.completion_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                    num_replies: before,
                });
            }

            std::thread::sleep(interval);
            interval = (interval * 2).min(self.config.max_poll_interval);
        }
    }

    /// Receive one datagram, run it through the mailbox, reply to the sender
    ///
    /// The reply is fire-and-forget: a failed send is logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns the receive error or the transaction error; no reply is sent
    /// for a failed transaction.
    pub fn serve_one(&mut self, socket: &UdpSocket) -> Result<SocketAddr> {
        let (len, peer) = socket.recv_from(&mut self.buf)?;
        self.stats.requests += 1;
        debug!("Received {len} bytes from {peer}");

        let reply = match self.transact(&self.buf[..len]) {
            Ok(reply) => reply,
            Err(e) => {
                if matches!(e, HalError::MailboxTimeout { .. }) {
                    self.stats.timeouts += 1;
                } else {
                    self.stats.errors += 1;
                }
                return Err(e);
            }
        };

        match socket.send_to(&reply, peer) {
            Ok(_) => self.stats.replies += 1,
            Err(e) => warn!("Failed to send {} byte reply to {peer}: {e}", reply.len()),
        }
        Ok(peer)
    }

    /// Serve datagrams forever
    ///
    /// Failed transactions are logged and counted; the loop carries on with
    /// the next datagram.
    ///
    /// # Errors
    ///
    /// Returns error only if the socket cannot be configured.
    pub fn run(&mut self, socket: &UdpSocket) -> Result<()> {
        socket.set_write_timeout(Some(self.config.reply_timeout))?;
        info!("Mailbox bridge serving on {}", socket.local_addr()?);

        loop {
            match self.serve_one(socket) {
                Ok(peer) => debug!("Served {peer}"),
                Err(HalError::Io { source }) => warn!("Receive failed: {source}"),
                Err(e) => warn!("Dropped request: {e}"),
            }

            let stats = self.stats;
            if stats.requests > 0 && stats.requests % 10_000 == 0 {
                info!(?stats, "Bridge counters");
            }
        }
    }
}

fn page_overflow(status: &MailboxStatus) -> HalError {
    HalError::out_of_range(
        u64::from(status.words_per_page) * u64::from(status.next_request_page),
        1,
        u32::MAX as usize,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendType;
    use crate::backends::SoftwareBackend;
    use hermes_regs::PAGE_FLAG;
    use std::cell::{Cell, RefCell};

    /// Firmware stand-in: answers the request once `num_replies` has been
    /// polled `latency` times after a payload was written.
    #[derive(Debug)]
    struct FakeFirmware {
        mem: RefCell<SoftwareBackend>,
        reply: Vec<u32>,
        latency: u32,
        armed: Cell<bool>,
        polls: Cell<u32>,
    }

    impl FakeFirmware {
        fn new(status: [u32; 4], reply: Vec<u32>, latency: u32) -> Self {
            let mut mem = SoftwareBackend::new(256);
            mem.write_block(0, &status).unwrap();
            Self {
                mem: RefCell::new(mem),
                reply,
                latency,
                armed: Cell::new(false),
                polls: Cell::new(0),
            }
        }

        fn respond(&self) {
            let mut mem = self.mem.borrow_mut();
            let wpp = mem.read_word(1).unwrap();
            let page = mem.read_word(2).unwrap();
            let base = wpp * page + 4;
            let header = PAGE_FLAG | (self.reply.len() as u32 - 1);
            mem.write_word(base, header).unwrap();
            mem.write_block(base + 1, &self.reply).unwrap();
            let n = mem.read_word(3).unwrap();
            mem.write_word(3, n.wrapping_add(1)).unwrap();
        }
    }

    impl WordSpace for FakeFirmware {
        fn len_words(&self) -> usize {
            self.mem.borrow().len_words()
        }

        fn read_word(&self, addr: u32) -> Result<u32> {
            if addr == 3 && self.armed.get() {
                self.polls.set(self.polls.get() + 1);
                if self.polls.get() > self.latency {
                    self.armed.set(false);
                    self.respond();
                }
            }
            self.mem.borrow().read_word(addr)
        }

        fn write_word(&mut self, addr: u32, value: u32) -> Result<()> {
            self.mem.get_mut().write_word(addr, value)
        }

        fn read_block(&self, addr: u32, out: &mut [u32]) -> Result<()> {
            self.mem.borrow().read_block(addr, out)
        }

        fn write_block(&mut self, addr: u32, data: &[u32]) -> Result<()> {
            self.armed.set(true);
            self.mem.get_mut().write_block(addr, data)
        }

        fn backend_type(&self) -> BackendType {
            BackendType::Software
        }
    }

    fn bridge(fw: FakeFirmware, config: BridgeConfig) -> MailboxBridge<FakeFirmware> {
        MailboxBridge::new(Arc::new(RegisterAccess::new(fw)), config)
    }

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            completion_timeout: Duration::from_millis(50),
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn byte_word_conversion_is_little_endian() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0xaa, 0xbb, 0xcc, 0xdd, 0xee];
        let words = words_from_le_bytes(&bytes);
        assert_eq!(words, vec![0x0403_0201, 0xddcc_bbaa]);
        assert_eq!(words_to_le_bytes(&words), bytes[..8].to_vec());
    }

    #[test]
    fn reference_transaction() {
        let reply = vec![0x2000_00f0, 0xdead_beef, 0x0000_0001, 0x1234_5678];
        let fw = FakeFirmware::new([4, 20, 1, 5], reply.clone(), 3);
        let b = bridge(fw, fast_config());

        let request: Vec<u8> = words_to_le_bytes(&[0x2000_00f0, 0x2000_010f, 0x0000_0010]);
        assert_eq!(request.len(), 12);

        let out = b.transact(&request).unwrap();
        assert_eq!(out, words_to_le_bytes(&reply));

        let hw = Arc::try_unwrap(b.hw).unwrap().into_inner();
        let mem = hw.mem.into_inner();
        assert_eq!(mem.words()[20], 0x0001_0002);
        assert_eq!(&mem.words()[21..24], &[0x2000_00f0, 0x2000_010f, 0x0000_0010]);
        assert_eq!(mem.words()[3], 6);
    }

    #[test]
    fn firmware_that_never_answers_times_out() {
        let fw = FakeFirmware::new([4, 20, 1, 9], vec![1], u32::MAX);
        let b = bridge(fw, fast_config());

        let err = b.transact(&[0; 8]).unwrap_err();
        assert!(matches!(
            err,
            HalError::MailboxTimeout { duration_ms: 50, num_replies: 9 }
        ));
    }

    #[test]
    fn unchecked_mode_reads_reply_page_immediately() {
        let fw = FakeFirmware::new([2, 16, 1, 0], vec![0xabcd], u32::MAX);
        fw.mem.borrow_mut().write_block(20, &[PAGE_FLAG, 0x1111]).unwrap();
        let b = bridge(
            fw,
            BridgeConfig {
                check_replies: false,
                ..fast_config()
            },
        );

        let out = b.transact(&[1, 0, 0, 0]).unwrap();
        assert_eq!(out, vec![0x11, 0x11, 0, 0]);
    }

    #[test]
    fn trailing_partial_word_is_dropped() {
        let fw = FakeFirmware::new([4, 20, 1, 0], vec![7], 0);
        let b = bridge(fw, fast_config());

        b.transact(&[1, 0, 0, 0, 2, 0, 0, 0, 0xff, 0xff]).unwrap();

        let mem = Arc::try_unwrap(b.hw).unwrap().into_inner().mem.into_inner();
        assert_eq!(mem.words()[20], 0x0001_0001);
        assert_eq!(&mem.words()[21..23], &[1, 2]);
    }

    #[test]
    fn empty_and_oversized_datagrams_are_rejected() {
        let fw = FakeFirmware::new([4, 4, 1, 0], vec![7], 0);
        let b = bridge(fw, fast_config());

        assert!(matches!(b.transact(&[]), Err(HalError::InvalidDatagram { .. })));
        assert!(matches!(b.transact(&[0; 3]), Err(HalError::InvalidDatagram { .. })));
        assert!(matches!(b.transact(&[0; 16]), Err(HalError::InvalidDatagram { .. })));
        // Nothing reached the page.
        assert_eq!(b.hardware().read_word(4).unwrap(), 0);
    }

    #[test]
    fn reply_without_flag_is_rejected() {
        let fw = FakeFirmware::new([2, 16, 1, 0], vec![1], 0);
        let b = bridge(
            fw,
            BridgeConfig {
                check_replies: false,
                ..fast_config()
            },
        );
        let err = b.transact(&[1, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, HalError::InvalidPageHeader { addr: 20, word: 0 }));
    }

    #[test]
    fn serves_over_udp_loopback() {
        let fw = FakeFirmware::new([4, 20, 1, 5], vec![0x6463_6261], 1);
        let mut b = bridge(fw, fast_config());

        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        client.send_to(&[1, 2, 3, 4], server.local_addr().unwrap()).unwrap();
        let peer = b.serve_one(&server).unwrap();
        assert_eq!(peer, client.local_addr().unwrap());

        let mut buf = [0u8; 64];
        let (n, from) = client.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abcd");
        assert_eq!(from, server.local_addr().unwrap());
        assert_eq!(
            b.stats(),
            BridgeStats {
                requests: 1,
                replies: 1,
                timeouts: 0,
                errors: 0
            }
        );
    }
}
