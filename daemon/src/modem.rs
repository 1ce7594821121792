//! C3 — the modem device driver (spec §4.3).
//!
//! Generalizes the teacher's fixed-115200, AT-command-only `Modem` into the
//! full Command/Data state machine §4.3 requires: configurable baud, `ATDT`
//! dialing with CONNECT-line parsing, DCD-wait, two hangup strategies, and
//! reset. Keeps the teacher's dedicated-I/O-thread + channel design so
//! blocking serial syscalls never touch the tokio runtime, and its
//! `nix::termios` raw-mode setup, generalized to parametrize baud rate
//! instead of hard-coding it.
//!
//! The thread owns the fd for its entire life. In Command state it answers
//! one `ModemRequest` at a time over `tx`/oneshot replies, exactly like the
//! teacher's AT-only driver. Once `Dial` succeeds, the same thread switches
//! to a data-relay loop: it polls the same `tx` channel for a `Hangup`/
//! `Reset` control message between reads, and otherwise shuttles bytes
//! between the fd and the pair of `tokio::sync::mpsc` channels returned to
//! the caller as [`DataChannels`] — using `blocking_send`/`try_recv`, which
//! `tokio::sync::mpsc` supports from synchronous code for exactly this kind
//! of bridge.

use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg, SpecialCharacterIndices};
use nix::unistd;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use fidotest_common::{DialFailureReason, DialResult};

use crate::config::HangupMethod;

const READ_BUF_SIZE: usize = 4096;
const DATA_POLL_IDLE: Duration = Duration::from_millis(20);

/// Errors raised by the modem driver (spec §7's `TransientIO`/`ConfigError`
/// subset a serial device can itself report).
#[derive(Debug, Clone)]
pub enum ModemError {
    Io(String),
    Timeout,
    NotInCommandState,
}

impl std::fmt::Display for ModemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModemError::Io(e) => write!(f, "modem I/O error: {e}"),
            ModemError::Timeout => write!(f, "modem command timeout"),
            ModemError::NotInCommandState => write!(f, "modem is in data mode"),
        }
    }
}

impl std::error::Error for ModemError {}

/// The two byte-stream halves handed to [`crate::conn::ModemConn`] once a
/// dial succeeds (spec §4.3's "bidirectional byte stream with deadlines").
pub struct DataChannels {
    pub read_rx: mpsc::Receiver<Vec<u8>>,
    pub write_tx: mpsc::Sender<Vec<u8>>,
}

enum ModemRequest {
    Command {
        command: String,
        timeout: Duration,
        reply: oneshot::Sender<Result<String, ModemError>>,
    },
    Dial {
        phone: String,
        dial_prefix: String,
        dial_timeout: Duration,
        carrier_timeout: Duration,
        reply: oneshot::Sender<(DialResult, Option<DataChannels>)>,
    },
    Hangup {
        method: HangupMethod,
        reply: oneshot::Sender<Result<(), ModemError>>,
    },
    Reset {
        reply: oneshot::Sender<Result<(), ModemError>>,
    },
}

/// Cloneable handle to a modem serial port. Internally holds an
/// `mpsc::Sender` to the I/O thread — cloning just clones the sender.
#[derive(Clone)]
pub struct Modem {
    tx: mpsc::Sender<ModemRequest>,
    device: String,
}

impl Modem {
    /// Open a serial device and spawn the I/O thread (spec §4.3 "Closed →
    /// Command"). Sends `init` and expects `OK` within `at_command_timeout`.
    pub fn open(device: &str, baud_rate: u32, init: &str, at_command_timeout: Duration) -> Result<Self, ModemError> {
        let fd = fcntl::open(device, OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK, Mode::empty())
            .map_err(|e| ModemError::Io(format!("open {device}: {e}")))?;

        let flags = fcntl::fcntl(fd, fcntl::FcntlArg::F_GETFL).map_err(|e| ModemError::Io(format!("F_GETFL: {e}")))?;
        let mut oflags = OFlag::from_bits_truncate(flags);
        oflags.remove(OFlag::O_NONBLOCK);
        fcntl::fcntl(fd, fcntl::FcntlArg::F_SETFL(oflags)).map_err(|e| ModemError::Io(format!("F_SETFL: {e}")))?;

        configure_termios(fd, baud_rate)?;

        // SAFETY: fd was just opened above and is valid here.
        unsafe {
            termios::tcflush(borrow_fd(fd), termios::FlushArg::TCIOFLUSH)
                .map_err(|e| ModemError::Io(format!("tcflush: {e}")))?;
        }

        let (tx, rx) = mpsc::channel::<ModemRequest>(32);
        let dev_name = device.to_string();
        let init_cmd = init.to_string();

        std::thread::Builder::new()
            .name(format!("modem-{dev_name}"))
            .spawn(move || modem_thread(fd, rx, &dev_name, &init_cmd, at_command_timeout))
            .map_err(|e| ModemError::Io(format!("spawn modem thread: {e}")))?;

        info!("Modem {device}: opened ({baud_rate} 8N1), init on I/O thread");

        Ok(Self {
            tx,
            device: device.to_string(),
        })
    }

    /// Send a raw AT command and wait for its result line (spec §4.3
    /// "Command state").
    pub async fn command(&self, cmd: &str, timeout: Duration) -> Result<String, ModemError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ModemRequest::Command {
                command: cmd.to_string(),
                timeout,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ModemError::Io(format!("modem {} I/O thread gone", self.device)))?;
        reply_rx
            .await
            .map_err(|_| ModemError::Io(format!("modem {} reply channel dropped", self.device)))?
    }

    /// Dial a phone number (spec §4.3's `Dial` contract: always returns a
    /// non-null [`DialResult`]). On success, also returns the data-mode
    /// byte channels the caller wraps as an `EmsiStream`.
    pub async fn dial(
        &self,
        phone: &str,
        dial_prefix: &str,
        dial_timeout: Duration,
        carrier_timeout: Duration,
    ) -> (DialResult, Option<DataChannels>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .tx
            .send(ModemRequest::Dial {
                phone: phone.to_string(),
                dial_prefix: dial_prefix.to_string(),
                dial_timeout,
                carrier_timeout,
                reply: reply_tx,
            })
            .await;
        if sent.is_err() {
            return (DialResult::failure(DialFailureReason::IoError, 0), None);
        }
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => (DialResult::failure(DialFailureReason::IoError, 0), None),
        }
    }

    /// End a data-mode call (spec §4.3's two hangup strategies).
    pub async fn hangup(&self, method: HangupMethod) -> Result<(), ModemError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ModemRequest::Hangup { method, reply: reply_tx })
            .await
            .map_err(|_| ModemError::Io(format!("modem {} I/O thread gone", self.device)))?;
        reply_rx
            .await
            .map_err(|_| ModemError::Io(format!("modem {} reply channel dropped", self.device)))?
    }

    /// Reset the modem (`ATZ`), valid even mid-data-mode as a recovery step
    /// (spec §4.3 "Any state → Command (reset)").
    pub async fn reset(&self) -> Result<(), ModemError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ModemRequest::Reset { reply: reply_tx })
            .await
            .map_err(|_| ModemError::Io(format!("modem {} I/O thread gone", self.device)))?;
        reply_rx
            .await
            .map_err(|_| ModemError::Io(format!("modem {} reply channel dropped", self.device)))?
    }

    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }
}

unsafe fn borrow_fd(fd: RawFd) -> BorrowedFd<'static> {
    BorrowedFd::borrow_raw(fd)
}

fn baud_rate_flag(baud: u32) -> Result<termios::BaudRate, ModemError> {
    match baud {
        9_600 => Ok(termios::BaudRate::B9600),
        19_200 => Ok(termios::BaudRate::B19200),
        38_400 => Ok(termios::BaudRate::B38400),
        57_600 => Ok(termios::BaudRate::B57600),
        115_200 => Ok(termios::BaudRate::B115200),
        other => Err(ModemError::Io(format!("unsupported baud rate {other}"))),
    }
}

/// Configure termios: raw mode, requested baud, 8N1, hardware flow control.
/// VMIN=0, VTIME=1 → reads return after 100ms of silence.
fn configure_termios(fd: RawFd, baud_rate: u32) -> Result<(), ModemError> {
    let borrowed = unsafe { borrow_fd(fd) };
    let mut tio = termios::tcgetattr(borrowed).map_err(|e| ModemError::Io(format!("tcgetattr: {e}")))?;

    termios::cfmakeraw(&mut tio);

    let baud = baud_rate_flag(baud_rate)?;
    termios::cfsetispeed(&mut tio, baud).map_err(|e| ModemError::Io(format!("cfsetispeed: {e}")))?;
    termios::cfsetospeed(&mut tio, baud).map_err(|e| ModemError::Io(format!("cfsetospeed: {e}")))?;

    tio.control_flags |= termios::ControlFlags::CREAD | termios::ControlFlags::CRTSCTS;
    tio.control_flags &= !termios::ControlFlags::CLOCAL;

    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 1;

    termios::tcsetattr(borrowed, SetArg::TCSANOW, &tio).map_err(|e| ModemError::Io(format!("tcsetattr: {e}")))?;
    Ok(())
}

/// Blocking I/O thread: Command state answers one request at a time; once
/// a dial enters data mode, the same loop interleaves byte relay with
/// polling for a `Hangup`/`Reset` control message.
fn modem_thread(fd: RawFd, mut rx: mpsc::Receiver<ModemRequest>, device: &str, init_cmd: &str, at_timeout: Duration) {
    match execute_at(fd, init_cmd, at_timeout) {
        Ok(resp) => info!("Modem {device}: initialized ({init_cmd}): {:?}", resp.trim()),
        Err(e) => warn!("Modem {device}: init failed ({e}), continuing anyway"),
    }

    while let Some(req) = rx.blocking_recv() {
        match req {
            ModemRequest::Command { command, timeout, reply } => {
                let result = execute_at(fd, &command, timeout);
                let _ = reply.send(result);
            }
            ModemRequest::Dial {
                phone,
                dial_prefix,
                dial_timeout,
                carrier_timeout,
                reply,
            } => {
                let outcome = execute_dial(fd, device, &phone, &dial_prefix, dial_timeout, carrier_timeout, &mut rx);
                let _ = reply.send(outcome);
            }
            ModemRequest::Hangup { reply, .. } => {
                // Not in data mode (Dial's inner loop owns hangup handling
                // while a call is up); outside a call this is a no-op.
                let _ = reply.send(Ok(()));
            }
            ModemRequest::Reset { reply } => {
                let result = execute_at(fd, "ATZ", at_timeout).map(|_| ());
                let _ = reply.send(result);
            }
        }
    }

    debug!("Modem {device} I/O thread exiting");
    let _ = unistd::close(fd);
}

/// Dial, wait for CONNECT/failure, and (on success) run the data-relay
/// loop until the caller hangs up or resets (spec §4.3's Command↔Data
/// transitions).
fn execute_dial(
    fd: RawFd,
    device: &str,
    phone: &str,
    dial_prefix: &str,
    dial_timeout: Duration,
    carrier_timeout: Duration,
    rx: &mut mpsc::Receiver<ModemRequest>,
) -> (DialResult, Option<DataChannels>) {
    let started = Instant::now();
    let cmd = format!("{dial_prefix}{phone}");

    let bfd = unsafe { borrow_fd(fd) };
    if termios::tcflush(bfd, termios::FlushArg::TCIOFLUSH).is_err() {
        return (DialResult::failure(DialFailureReason::IoError, elapsed_ms(started)), None);
    }
    let cmd_bytes = format!("{cmd}\r");
    if unistd::write(bfd, cmd_bytes.as_bytes()).is_err() {
        return (DialResult::failure(DialFailureReason::IoError, elapsed_ms(started)), None);
    }

    let deadline = Instant::now() + dial_timeout;
    let mut response = String::with_capacity(128);
    let mut ring_count = 0u32;
    let result_line = loop {
        if Instant::now() >= deadline {
            break None;
        }
        let mut buf = [0u8; READ_BUF_SIZE];
        match unistd::read(fd, &mut buf) {
            Ok(0) => {}
            Ok(n) => {
                response.push_str(&String::from_utf8_lossy(&buf[..n]));
                ring_count = response.matches("RING").count() as u32;
                if let Some(line) = final_result_line(&response) {
                    break Some(line);
                }
            }
            Err(nix::errno::Errno::EAGAIN) => {}
            Err(_) => break None,
        }
    };

    let Some(line) = result_line else {
        debug!("Modem {device}: dial {phone} timed out");
        return (DialResult::failure(DialFailureReason::Timeout, elapsed_ms(started)), None);
    };

    if let Some(reason) = DialFailureReason::from_result_line(&line) {
        debug!("Modem {device}: dial {phone} -> {line}");
        return (DialResult::failure(reason, elapsed_ms(started)), None);
    }

    let Some((speed, protocol)) = parse_connect_line(&line) else {
        return (
            DialResult::failure(DialFailureReason::Error, elapsed_ms(started)),
            None,
        );
    };

    // Wait for DCD to stabilize before flipping to data mode.
    std::thread::sleep(carrier_timeout);
    let _ = termios::tcflush(bfd, termios::FlushArg::TCIOFLUSH);

    let dial_duration = elapsed_ms(started);
    info!("Modem {device}: CONNECT {speed} {protocol:?} after {dial_duration}ms");

    let (read_tx, read_rx) = mpsc::channel::<Vec<u8>>(64);
    let (write_tx, mut write_rx) = mpsc::channel::<Vec<u8>>(64);

    let carrier_started = Instant::now();
    data_relay_loop(fd, device, rx, &read_tx, &mut write_rx);
    let carrier_duration = carrier_started.elapsed().as_millis() as u64;

    let dial = DialResult {
        success: true,
        connect_speed: speed,
        protocol,
        ring_count,
        dial_duration_ms: dial_duration,
        carrier_duration_ms: carrier_duration,
        failure_reason: None,
    };
    (dial, Some(DataChannels { read_rx, write_tx }))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Relay bytes between the fd and the caller's data channels until a
/// `Hangup`/`Reset` control message arrives, or the caller drops its write
/// half (which this loop treats as an implicit hangup).
///
/// Control-message handling runs inline here (rather than returning control
/// to the outer `modem_thread` match) because the outer loop has no way to
/// know a call is up; it would otherwise dispatch a `Hangup` as its
/// no-op default arm.
fn data_relay_loop(
    fd: RawFd,
    device: &str,
    rx: &mut mpsc::Receiver<ModemRequest>,
    read_tx: &mpsc::Sender<Vec<u8>>,
    write_rx: &mut mpsc::Receiver<Vec<u8>>,
) {
    loop {
        match rx.try_recv() {
            Ok(ModemRequest::Hangup { method, reply }) => {
                let result = perform_hangup(fd, method);
                let _ = reply.send(result);
                return;
            }
            Ok(ModemRequest::Reset { reply }) => {
                let result = execute_at(fd, "ATZ", Duration::from_secs(5)).map(|_| ());
                let _ = reply.send(result);
                return;
            }
            Ok(ModemRequest::Command { reply, .. }) => {
                let _ = reply.send(Err(ModemError::NotInCommandState));
            }
            Ok(ModemRequest::Dial { reply, .. }) => {
                let _ = reply.send((DialResult::failure(DialFailureReason::Error, 0), None));
            }
            Err(mpsc::error::TryRecvError::Empty) => {}
            Err(mpsc::error::TryRecvError::Disconnected) => {
                warn!("Modem {device}: control channel closed mid-call");
                return;
            }
        }

        match write_rx.try_recv() {
            Ok(bytes) => {
                let bfd = unsafe { borrow_fd(fd) };
                if unistd::write(bfd, &bytes).is_err() {
                    warn!("Modem {device}: write error mid-call");
                    return;
                }
            }
            Err(mpsc::error::TryRecvError::Empty) => {}
            Err(mpsc::error::TryRecvError::Disconnected) => {
                debug!("Modem {device}: caller dropped write half, hanging up");
                return;
            }
        }

        let mut buf = [0u8; READ_BUF_SIZE];
        match unistd::read(fd, &mut buf) {
            Ok(0) => std::thread::sleep(DATA_POLL_IDLE),
            Ok(n) => {
                if read_tx.blocking_send(buf[..n].to_vec()).is_err() {
                    debug!("Modem {device}: caller dropped read half");
                    return;
                }
            }
            Err(nix::errno::Errno::EAGAIN) => std::thread::sleep(DATA_POLL_IDLE),
            Err(e) => {
                warn!("Modem {device}: read error mid-call ({e})");
                return;
            }
        }
    }
}

/// Toggle DTR via `TIOCMGET`/`TIOCMSET` (the usual way to reach modem
/// control lines that `nix::termios` itself doesn't expose).
fn set_dtr(fd: RawFd, on: bool) -> Result<(), ModemError> {
    let mut status: libc::c_int = 0;
    if unsafe { libc::ioctl(fd, libc::TIOCMGET, std::ptr::addr_of_mut!(status)) } != 0 {
        return Err(ModemError::Io("TIOCMGET failed".to_string()));
    }
    if on {
        status |= libc::TIOCM_DTR;
    } else {
        status &= !libc::TIOCM_DTR;
    }
    if unsafe { libc::ioctl(fd, libc::TIOCMSET, std::ptr::addr_of!(status)) } != 0 {
        return Err(ModemError::Io("TIOCMSET failed".to_string()));
    }
    Ok(())
}

fn perform_hangup(fd: RawFd, method: HangupMethod) -> Result<(), ModemError> {
    let bfd = unsafe { borrow_fd(fd) };
    match method {
        HangupMethod::Dtr => {
            set_dtr(fd, false)?;
            std::thread::sleep(Duration::from_millis(500));
            set_dtr(fd, true)?;
            std::thread::sleep(Duration::from_millis(100));
            let _ = termios::tcflush(bfd, termios::FlushArg::TCIOFLUSH);
            Ok(())
        }
        HangupMethod::Escape => {
            std::thread::sleep(Duration::from_secs(1));
            unistd::write(bfd, b"+++").map_err(|e| ModemError::Io(e.to_string()))?;
            std::thread::sleep(Duration::from_secs(1));
            wait_for_ok(fd, Duration::from_secs(2))?;
            unistd::write(bfd, b"ATH\r").map_err(|e| ModemError::Io(e.to_string()))?;
            wait_for_ok(fd, Duration::from_secs(2))?;
            let _ = termios::tcflush(bfd, termios::FlushArg::TCIOFLUSH);
            Ok(())
        }
    }
}

fn wait_for_ok(fd: RawFd, timeout: Duration) -> Result<(), ModemError> {
    let deadline = Instant::now() + timeout;
    let mut response = String::new();
    while Instant::now() < deadline {
        let mut buf = [0u8; 256];
        match unistd::read(fd, &mut buf) {
            Ok(0) | Err(nix::errno::Errno::EAGAIN) => {}
            Ok(n) => {
                response.push_str(&String::from_utf8_lossy(&buf[..n]));
                if response.contains("OK") {
                    return Ok(());
                }
            }
            Err(e) => return Err(ModemError::Io(e.to_string())),
        }
    }
    Err(ModemError::Timeout)
}

/// Execute a single AT command: flush → write → read until terminator.
fn execute_at(fd: RawFd, command: &str, timeout: Duration) -> Result<String, ModemError> {
    let bfd = unsafe { borrow_fd(fd) };
    termios::tcflush(bfd, termios::FlushArg::TCIOFLUSH).map_err(|e| ModemError::Io(format!("tcflush: {e}")))?;

    let cmd_bytes = format!("{command}\r");
    unistd::write(bfd, cmd_bytes.as_bytes()).map_err(|e| ModemError::Io(format!("write: {e}")))?;

    let mut buf = [0u8; READ_BUF_SIZE];
    let mut response = String::with_capacity(256);
    let deadline = Instant::now() + timeout;

    loop {
        if Instant::now() >= deadline {
            return Err(ModemError::Timeout);
        }
        match unistd::read(fd, &mut buf) {
            Ok(0) => {
                if response_is_complete(&response) {
                    break;
                }
            }
            Ok(n) => {
                response.push_str(&String::from_utf8_lossy(&buf[..n]));
                if response_is_complete(&response) {
                    break;
                }
            }
            Err(nix::errno::Errno::EAGAIN) => {
                if response_is_complete(&response) {
                    break;
                }
            }
            Err(e) => return Err(ModemError::Io(e.to_string())),
        }
    }

    Ok(strip_echo(&sanitize_response(&response)))
}

fn response_is_complete(response: &str) -> bool {
    for line in response.lines() {
        let trimmed = line.trim();
        if trimmed == "OK"
            || trimmed == "ERROR"
            || trimmed.starts_with("+CME ERROR:")
            || trimmed.starts_with("+CMS ERROR:")
            || trimmed == "BUSY"
            || trimmed == "NO CARRIER"
            || trimmed == "NO DIALTONE"
            || trimmed == "NO ANSWER"
            || trimmed.starts_with("CONNECT")
        {
            return true;
        }
    }
    false
}

/// Find the line that decides the dial (a failure code or a CONNECT line),
/// once the accumulated response contains a complete line.
fn final_result_line(response: &str) -> Option<String> {
    response
        .lines()
        .map(str::trim)
        .find(|l| {
            matches!(*l, "BUSY" | "NO CARRIER" | "NO DIALTONE" | "NO ANSWER" | "ERROR") || l.starts_with("CONNECT")
        })
        .map(str::to_string)
}

/// Parse `CONNECT <speed>[/<modifier>...]` (spec §6).
fn parse_connect_line(line: &str) -> Option<(u32, Option<String>)> {
    let rest = line.strip_prefix("CONNECT")?.trim();
    if rest.is_empty() {
        return Some((0, None));
    }
    let mut parts = rest.splitn(2, '/');
    let speed: u32 = parts.next()?.trim().parse().ok()?;
    let protocol = parts.next().map(str::to_string);
    Some((speed, protocol))
}

fn sanitize_response(response: &str) -> String {
    response
        .chars()
        .filter(|&c| c == '\r' || c == '\n' || !c.is_control())
        .filter(|&c| c != '\u{FFFD}')
        .collect()
}

fn strip_echo(response: &str) -> String {
    response
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return false;
            }
            let alpha_start = trimmed.find(|c: char| c.is_ascii_alphabetic());
            if let Some(pos) = alpha_start {
                !trimmed[pos..].starts_with("AT")
            } else {
                true
            }
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_line_with_protocol_modifier() {
        assert_eq!(
            parse_connect_line("CONNECT 33600/V.34/LAP-M"),
            Some((33_600, Some("V.34/LAP-M".to_string())))
        );
    }

    #[test]
    fn parses_bare_connect_line() {
        assert_eq!(parse_connect_line("CONNECT"), Some((0, None)));
    }

    #[test]
    fn rejects_non_connect_line() {
        assert_eq!(parse_connect_line("OK"), None);
    }

    #[test]
    fn final_result_line_finds_busy_after_rings() {
        let response = "RING\r\nRING\r\nBUSY\r\n";
        assert_eq!(final_result_line(response), Some("BUSY".to_string()));
    }

    #[test]
    fn final_result_line_finds_connect() {
        let response = "RING\r\nCONNECT 9600/V.32\r\n";
        assert_eq!(final_result_line(response), Some("CONNECT 9600/V.32".to_string()));
    }

    #[test]
    fn response_is_complete_detects_connect() {
        assert!(response_is_complete("CONNECT 33600/V.34\r\n"));
    }

    #[test]
    fn strip_echo_removes_command_line() {
        let stripped = strip_echo("ATZ\r\nOK\r\n");
        assert!(!stripped.contains("ATZ"));
        assert!(stripped.contains("OK"));
    }
}
