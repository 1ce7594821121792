//! C1 — the character reader (spec §4.1).
//!
//! Delivers a cleaned byte stream into a sliding-window token detector
//! while accumulating a banner of non-EMSI bytes for software
//! identification, and watches line boundaries for the exact carrier-loss
//! phrases reference mailers emit.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::token::{CommandKind, Token};

/// Absolute ceiling on any single-byte read, regardless of configured
/// `char_timeout` (spec §4.2: "8 s absolute ceiling").
pub const ABSOLUTE_CHAR_CEILING: Duration = Duration::from_secs(8);

/// Sliding window length: long enough to hold `**EMSI_XXX` (10 bytes).
const WINDOW_LEN: usize = 14;

/// Banner accumulation cap (spec §4.1: "a reasonable ceiling, e.g. 8 KiB").
const BANNER_CAP: usize = 8 * 1024;

/// Exact carrier-loss phrases (spec §4.1's "Line-boundary carrier
/// detection"). Compared against the trimmed, stripped line.
const CARRIER_LOSS_PHRASES: [&str; 4] = ["NO CARRIER", "BUSY", "NO DIALTONE", "NO ANSWER"];

/// Outcome of a single raw byte fetch, before any token-level
/// interpretation (spec §4.1's `getchar` contract).
#[derive(Debug, Clone)]
pub enum CharOutcome {
    Byte(u8),
    Timeout,
    CarrierLost,
    IoError(String),
}

/// C1: a per-byte stream reader with three-tier timeouts, control-byte
/// suppression, high-bit stripping, carrier detection, and banner capture.
///
/// Generic over any `AsyncRead` so the same code drives a TCP socket or a
/// modem's wrapped serial byte stream.
pub struct CharReader<S> {
    stream: S,
    /// Bytes "unread" back onto the front of the stream — used when a
    /// peeked CRC tail turns out not to be hex and must be replayed for
    /// ordinary token matching.
    pending: VecDeque<u8>,
    window: VecDeque<u8>,
    banner: String,
    line_buf: Vec<u8>,
    /// Once set, every subsequent read reports `CarrierLost` without
    /// touching the underlying stream (invariant: "reader never un-trips").
    carrier_lost: bool,
    /// Absolute wall-clock deadline for the whole session (spec §4.2's
    /// three-tier timeout model). `None` means unbounded.
    master_deadline: Option<Instant>,
}

impl<S: AsyncRead + Unpin> CharReader<S> {
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: VecDeque::new(),
            window: VecDeque::with_capacity(WINDOW_LEN),
            banner: String::new(),
            line_buf: Vec::new(),
            carrier_lost: false,
            master_deadline: None,
        }
    }

    /// Set the session's master deadline (spec §4.2: "Master deadline =
    /// start + master_timeout").
    pub fn set_master_deadline(&mut self, deadline: Instant) {
        self.master_deadline = Some(deadline);
    }

    /// Text accumulated from non-control bytes, for software
    /// identification when EMSI negotiation fails.
    #[must_use]
    pub fn banner(&self) -> &str {
        &self.banner
    }

    #[must_use]
    pub fn is_carrier_lost(&self) -> bool {
        self.carrier_lost
    }

    pub(crate) fn remaining_master(&self) -> Duration {
        match self.master_deadline {
            Some(d) => d.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    /// `getchar(per_byte_timeout)` — spec §4.1. Reads exactly one raw byte
    /// (no cleaning) off the wire, respecting `min(per_byte_timeout,
    /// master_deadline - now)`. Any underlying I/O error (including EOF)
    /// maps to `CarrierLost`, per spec.
    pub async fn getchar(&mut self, per_byte_timeout: Duration) -> CharOutcome {
        if self.carrier_lost {
            return CharOutcome::CarrierLost;
        }
        if let Some(b) = self.pending.pop_front() {
            return CharOutcome::Byte(b);
        }

        let remaining_master = self.remaining_master();
        if remaining_master.is_zero() {
            return CharOutcome::Timeout;
        }
        let effective = per_byte_timeout.min(remaining_master).min(ABSOLUTE_CHAR_CEILING);

        let mut buf = [0u8; 1];
        match tokio::time::timeout(effective, self.stream.read_exact(&mut buf)).await {
            Ok(Ok(_)) => CharOutcome::Byte(buf[0]),
            Ok(Err(_)) => {
                // Socket close, serial read error, or any other I/O fault:
                // spec §4.1 maps this to CarrierLost, a terminal state.
                self.carrier_lost = true;
                CharOutcome::CarrierLost
            }
            Err(_) => CharOutcome::Timeout,
        }
    }

    /// Push cleaned bytes back onto the front of the stream — order is
    /// preserved, so a subsequent `next_stream_byte` call returns `bytes[0]`
    /// first.
    fn push_back(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().rev() {
            self.pending.push_front(b);
        }
    }

    /// Fetch the next *cleaned* byte: drops `NUL`/XON/XOFF, strips the high
    /// bit, and feeds the line-boundary carrier detector. Does **not**
    /// touch the sliding window or banner — those are fed only by
    /// `read_token`'s loop, not by `read_emsi_dat`'s payload reads (spec
    /// §4.1 describes window/banner feeding as a `read_token` step; §4.2's
    /// DAT-body reader only strips).
    pub(crate) async fn next_stream_byte(
        &mut self,
        step_deadline: Instant,
        char_timeout: Duration,
    ) -> Result<u8, Token> {
        loop {
            if Instant::now() >= step_deadline {
                return Err(Token::Timeout);
            }
            let remaining_step = step_deadline.saturating_duration_since(Instant::now());
            let per_byte = char_timeout.min(remaining_step);
            match self.getchar(per_byte).await {
                CharOutcome::Byte(raw) => {
                    if matches!(raw, 0x00 | 0x11 | 0x13) {
                        // NUL / XON / XOFF: never enter banner, window, or CRC.
                        continue;
                    }
                    let clean = raw & 0x7F;
                    self.feed_carrier_detector(clean);
                    return Ok(clean);
                }
                CharOutcome::Timeout => return Err(Token::Timeout),
                CharOutcome::CarrierLost => return Err(Token::CarrierLost),
                CharOutcome::IoError(e) => return Err(Token::IoError(e)),
            }
        }
    }

    fn feed_carrier_detector(&mut self, b: u8) {
        if b == b'\r' || b == b'\n' {
            let line = String::from_utf8_lossy(&self.line_buf);
            let trimmed = line.trim();
            if CARRIER_LOSS_PHRASES.contains(&trimmed) {
                self.carrier_lost = true;
            }
            self.line_buf.clear();
        } else {
            self.line_buf.push(b);
        }
    }

    fn push_window_and_banner(&mut self, b: u8) {
        if self.window.len() >= WINDOW_LEN {
            self.window.pop_front();
        }
        self.window.push_back(b);

        if self.banner.len() >= BANNER_CAP {
            // Every byte here is ASCII (high bit already stripped), so
            // dropping one leading byte is always a char boundary.
            self.banner.drain(..1);
        }
        self.banner.push(b as char);
    }

    fn window_ends_with(&self, suffix: &[u8]) -> bool {
        if suffix.len() > self.window.len() {
            return false;
        }
        let skip = self.window.len() - suffix.len();
        self.window.iter().skip(skip).copied().eq(suffix.iter().copied())
    }

    /// Peek up to 4 bytes looking for a hex CRC tail (spec §4.1: "CRC tail
    /// is matched permissively"). On success the bytes are consumed; on
    /// failure (non-hex, timeout, or a fatal token) they are replayed via
    /// `push_back` and the caller still emits the armed command token.
    async fn try_consume_crc_tail(
        &mut self,
        step_deadline: Instant,
        char_timeout: Duration,
    ) -> Option<Token> {
        let mut buf = Vec::with_capacity(4);
        for _ in 0..4 {
            match self.next_stream_byte(step_deadline, char_timeout).await {
                Ok(b) => buf.push(b),
                Err(Token::CarrierLost) => return Some(Token::CarrierLost),
                Err(Token::IoError(e)) => return Some(Token::IoError(e)),
                Err(_) => break, // Timeout while peeking: not present, fall through.
            }
        }
        let all_hex = buf.len() == 4 && buf.iter().all(|&b| (b as char).is_ascii_hexdigit());
        if !all_hex {
            tracing::warn!(
                "EMSI command token CRC tail missing or malformed ({} bytes peeked)",
                buf.len()
            );
            self.push_back(&buf);
        }
        None
    }

    /// `read_token(step_timeout, char_timeout)` — spec §4.1/§4.2.
    pub async fn read_token(&mut self, step_timeout: Duration, char_timeout: Duration) -> Token {
        let char_timeout = char_timeout.min(ABSOLUTE_CHAR_CEILING);
        let step_deadline = Instant::now() + step_timeout.min(self.remaining_master());

        loop {
            let b = match self.next_stream_byte(step_deadline, char_timeout).await {
                Ok(b) => b,
                Err(tok) => return tok,
            };
            self.push_window_and_banner(b);

            if self.window_ends_with(b"**EMSI_DAT") {
                return Token::Dat;
            }

            for kind in CommandKind::all() {
                let prefixed = format!("**EMSI_{}", kind.word());
                let bare = format!("EMSI_{}", kind.word());
                if self.window_ends_with(prefixed.as_bytes()) || self.window_ends_with(bare.as_bytes())
                {
                    if let Some(fatal) = self.try_consume_crc_tail(step_deadline, char_timeout).await {
                        return fatal;
                    }
                    return kind.token();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn feed(bytes: &'static [u8]) -> CharReader<tokio::io::DuplexStream> {
        let (mut tx, rx) = duplex(4096);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = tx.write_all(bytes).await;
            // Keep `tx` alive for the duration of the test by leaking it;
            // tests only read a bounded number of bytes so EOF never
            // matters for these cases.
            std::mem::forget(tx);
        });
        CharReader::new(rx)
    }

    #[tokio::test]
    async fn recognizes_prefixed_command_with_crc() {
        let mut r = feed(b"**EMSI_INQC816").await;
        let tok = r.read_token(Duration::from_secs(1), Duration::from_secs(1)).await;
        assert_eq!(tok, Token::Inq);
    }

    #[tokio::test]
    async fn recognizes_dat_suffix_immediately_without_consuming_length() {
        let mut r = feed(b"**EMSI_DAT007F").await;
        let tok = r.read_token(Duration::from_secs(1), Duration::from_secs(1)).await;
        assert_eq!(tok, Token::Dat);
        // The length digits must still be available for read_emsi_dat.
        let b0 = r.next_stream_byte(Instant::now() + Duration::from_secs(1), Duration::from_secs(1)).await.unwrap();
        assert_eq!(b0, b'0');
    }

    #[tokio::test]
    async fn accepts_missing_double_star_prefix() {
        let mut r = feed(b"EMSI_REQA77E").await;
        let tok = r.read_token(Duration::from_secs(1), Duration::from_secs(1)).await;
        assert_eq!(tok, Token::Req);
    }

    #[tokio::test]
    async fn emits_token_even_without_crc_tail() {
        // No CRC follows ACK at all before the stream goes quiet.
        let mut r = feed(b"**EMSI_ACK").await;
        let tok = r.read_token(Duration::from_millis(300), Duration::from_millis(100)).await;
        assert_eq!(tok, Token::Ack);
    }

    #[tokio::test]
    async fn strips_control_bytes_and_high_bit() {
        // 0x00, 0x11 (XON), 0x13 (XOFF) interleaved, plus high-bit-set 'E'.
        let mut bytes = vec![0x00, 0x11, 0x13];
        bytes.extend_from_slice(b"**EMSI_HBTEAEE");
        let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
        let mut r = feed(bytes).await;
        let tok = r.read_token(Duration::from_secs(1), Duration::from_secs(1)).await;
        assert_eq!(tok, Token::Hbt);
        assert!(!r.banner().contains('\u{0}'));
    }

    #[tokio::test]
    async fn banner_accumulates_non_emsi_bytes() {
        let mut r = feed(b"GreatBBS v1.0 Welcome!\r\n").await;
        let tok = r.read_token(Duration::from_millis(200), Duration::from_millis(50)).await;
        assert_eq!(tok, Token::Timeout);
        assert!(r.banner().contains("GreatBBS"));
    }

    #[tokio::test]
    async fn mid_line_no_carrier_substring_does_not_trip() {
        let mut r = feed(b"Reason: NO CARRIER detected earlier\r\n**EMSI_HBTEAEE").await;
        let tok = r.read_token(Duration::from_secs(1), Duration::from_secs(1)).await;
        assert_eq!(tok, Token::Hbt);
        assert!(!r.is_carrier_lost());
    }

    #[tokio::test]
    async fn exact_no_carrier_line_trips_detector() {
        let mut r = feed(b"NO CARRIER\r\n").await;
        let tok = r.read_token(Duration::from_millis(300), Duration::from_millis(100)).await;
        // The line itself is consumed as banner text; carrier loss is
        // reported on the *next* read.
        assert_eq!(tok, Token::Timeout);
        assert!(r.is_carrier_lost());
        let next = r.getchar(Duration::from_millis(100)).await;
        assert!(matches!(next, CharOutcome::CarrierLost));
    }
}
