//! C2 — the EMSI session FSM (spec §4.2).
//!
//! Implemented as an explicit state enum driven by a dispatch loop rather
//! than nested per-phase switches (spec §9 prefers the table form — "easier
//! to test exhaustively"). Phase A decides whether we become the TX side,
//! the RX side, or both in sequence; the loop below folds that dispatch in.

use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::dat::{build_emsi_dat_packet, DatError, EmsiData};
use crate::reader::CharReader;
use crate::stream::EmsiStream;
use crate::token::Token;

/// Phase A's startup strategy (spec §4.2, §9's session config value object).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStrategy {
    Wait,
    SendCr,
    SendInq,
}

/// The full session configuration value object (spec §9).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub strategy: InitStrategy,
    pub preventive_inq: bool,
    pub max_retries: u32,
    pub send_ack_twice: bool,
    pub send_nak_on_retry: bool,
    pub skip_first_rx_req: bool,
    pub master_timeout: Duration,
    pub step_timeout: Duration,
    pub first_step_timeout: Duration,
    pub char_timeout: Duration,
    pub initial_cr_interval: Duration,
    pub accept_fd_len_with_cr: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            strategy: InitStrategy::Wait,
            preventive_inq: false,
            max_retries: 3,
            send_ack_twice: false,
            send_nak_on_retry: false,
            skip_first_rx_req: false,
            master_timeout: Duration::from_secs(60),
            step_timeout: Duration::from_secs(20),
            first_step_timeout: Duration::from_secs(10),
            char_timeout: Duration::from_secs(5),
            initial_cr_interval: Duration::from_secs(2),
            accept_fd_len_with_cr: true,
        }
    }
}

/// Our own identity, used to build the DAT we send (spec §4.2's "Build
/// EMSI_DAT from the session identity").
pub type SessionIdentity = EmsiData;

/// Which side of the handshake we ended up playing, for logging — the
/// spec's "Session Context" entity carries this, but nothing downstream
/// branches on it once the handshake is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Caller,
    Answerer,
}

/// Why a session failed (spec §7's error taxonomy, restricted to the
/// subset a session itself can raise).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Timeout,
    CarrierLost,
    IoError(String),
    ProtocolError(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Timeout => write!(f, "timeout"),
            SessionError::CarrierLost => write!(f, "carrier lost"),
            SessionError::IoError(e) => write!(f, "I/O error: {e}"),
            SessionError::ProtocolError(e) => write!(f, "protocol error: {e}"),
        }
    }
}

/// Outcome of a completed or failed session (spec §4.2's "Failure
/// semantics": an error carries a reason and the accumulated banner).
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub remote: Option<EmsiData>,
    pub banner: String,
    pub retries: u32,
    pub error: Option<SessionError>,
}

impl SessionOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        self.error.is_none() && self.remote.is_some()
    }
}

fn token_err(tok: Token) -> SessionError {
    match tok {
        Token::Timeout => SessionError::Timeout,
        Token::CarrierLost => SessionError::CarrierLost,
        Token::IoError(e) => SessionError::IoError(e),
        other => SessionError::ProtocolError(format!("unexpected token: {other}")),
    }
}

fn dat_err(e: DatError) -> SessionError {
    match e {
        DatError::Timeout => SessionError::Timeout,
        DatError::CarrierLost => SessionError::CarrierLost,
        DatError::IoError(e) => SessionError::IoError(e),
        other => SessionError::ProtocolError(other.to_string()),
    }
}

/// Internal dispatch result from Phase A: which phases remain, and any DAT
/// already consumed while deciding.
enum PhaseAOutcome {
    WeAreTx,
    WeAreRx,
    /// Remote sent DAT directly: stash it, then we still TX and wait for
    /// their ACK (spec §4.2 "Dispatch after Phase A").
    RemoteSentDatFirst(EmsiData),
}

/// Runs the complete EMSI handshake over `stream` and hands the stream
/// back to the caller afterward (spec §9's "ModemConn's close is a no-op;
/// ownership of hangup stays with the caller").
pub async fn run_session<S: EmsiStream>(
    stream: S,
    cfg: &SessionConfig,
    identity: &SessionIdentity,
) -> (S, SessionOutcome) {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = CharReader::new(read_half);
    reader.set_master_deadline(Instant::now() + cfg.master_timeout);

    let mut retries = 0u32;
    let result = run_phases(&mut reader, &mut write_half, cfg, identity, &mut retries).await;

    let (remote, error) = match result {
        Ok(remote) => (Some(remote), None),
        Err(e) => (None, Some(e)),
    };
    let outcome = SessionOutcome {
        remote,
        banner: reader.banner().to_string(),
        retries,
        error,
    };

    let read_half = reader.into_inner();
    let stream = read_half.unsplit(write_half);
    (stream, outcome)
}

async fn write_packet<W: AsyncWrite + Unpin>(w: &mut W, packet: &str) -> Result<(), SessionError> {
    w.write_all(packet.as_bytes())
        .await
        .map_err(|e| SessionError::IoError(e.to_string()))?;
    w.write_all(b"\r").await.map_err(|e| SessionError::IoError(e.to_string()))?;
    w.flush().await.map_err(|e| SessionError::IoError(e.to_string()))
}

async fn run_phases<S, W>(
    reader: &mut CharReader<S>,
    writer: &mut W,
    cfg: &SessionConfig,
    identity: &SessionIdentity,
    retries: &mut u32,
) -> Result<EmsiData, SessionError>
where
    S: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = phase_a(reader, writer, cfg).await?;

    match outcome {
        PhaseAOutcome::WeAreTx => {
            let from_tx = phase_tx(reader, writer, cfg, identity, retries).await?;
            match from_tx {
                Some(remote) => Ok(remote),
                None => phase_rx(reader, writer, cfg, identity, retries).await,
            }
        }
        PhaseAOutcome::WeAreRx => {
            let remote = phase_rx(reader, writer, cfg, identity, retries).await?;
            phase_tx(reader, writer, cfg, identity, retries).await?;
            Ok(remote)
        }
        PhaseAOutcome::RemoteSentDatFirst(remote) => {
            write_packet(writer, "**EMSI_ACKA490").await?;
            if cfg.send_ack_twice {
                write_packet(writer, "**EMSI_ACKA490").await?;
            }
            phase_tx(reader, writer, cfg, identity, retries).await?;
            Ok(remote)
        }
    }
}

async fn phase_a<S, W>(
    reader: &mut CharReader<S>,
    writer: &mut W,
    cfg: &SessionConfig,
) -> Result<PhaseAOutcome, SessionError>
where
    S: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match cfg.strategy {
        InitStrategy::Wait => {}
        InitStrategy::SendCr => write_cr_burst(writer, cfg).await?,
        InitStrategy::SendInq => write_packet(writer, "**EMSI_INQC816").await?,
    }

    let mut sent_preventive_inq = false;
    let mut first_read = true;
    loop {
        let step = if cfg.strategy == InitStrategy::SendCr && !first_read {
            cfg.initial_cr_interval
        } else {
            cfg.first_step_timeout
        };
        first_read = false;
        let tok = reader.read_token(step, cfg.char_timeout).await;
        match tok {
            Token::Req => return Ok(PhaseAOutcome::WeAreTx),
            Token::Inq => {
                write_packet(writer, "**EMSI_REQA77E").await?;
                return Ok(PhaseAOutcome::WeAreRx);
            }
            Token::Dat => {
                let (_, data) = reader
                    .read_emsi_dat(cfg.step_timeout, cfg.char_timeout)
                    .await
                    .map_err(dat_err)?;
                return Ok(PhaseAOutcome::RemoteSentDatFirst(data));
            }
            Token::Hbt => continue,
            Token::Ack | Token::Nak | Token::Cli => {
                return Err(SessionError::ProtocolError(format!(
                    "unexpected {tok} during initial contact"
                )));
            }
            Token::Timeout => {
                if cfg.strategy == InitStrategy::SendCr {
                    write_cr_burst(writer, cfg).await?;
                    continue;
                }
                if cfg.preventive_inq && !sent_preventive_inq {
                    sent_preventive_inq = true;
                    write_packet(writer, "**EMSI_INQC816").await?;
                    continue;
                }
                return Err(SessionError::Timeout);
            }
            Token::CarrierLost => return Err(SessionError::CarrierLost),
            Token::IoError(e) => return Err(SessionError::IoError(e)),
        }
    }
}

async fn write_cr_burst<W: AsyncWrite + Unpin>(writer: &mut W, cfg: &SessionConfig) -> Result<(), SessionError> {
    // Pacing between nudges is `initial_cr_interval`; phase_a's read loop
    // re-enters here on each Timeout, so a single CR per call is enough.
    let _ = cfg.initial_cr_interval;
    writer.write_all(b"\r").await.map_err(|e| SessionError::IoError(e.to_string()))?;
    writer.flush().await.map_err(|e| SessionError::IoError(e.to_string()))
}

/// Phase TX — send our DAT, wait for ACK. Returns `Ok(Some(remote))` if the
/// peer answered with its own DAT before ACKing ours (spec §4.2: "some
/// mailers send DAT before ACK"), else `Ok(None)` on plain ACK success.
async fn phase_tx<S, W>(
    reader: &mut CharReader<S>,
    writer: &mut W,
    cfg: &SessionConfig,
    identity: &SessionIdentity,
    retries: &mut u32,
) -> Result<Option<EmsiData>, SessionError>
where
    S: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let packet = build_emsi_dat_packet(identity);
    let mut local_retries = 0u32;
    loop {
        write_packet(writer, &packet).await?;
        loop {
            let tok = reader.read_token(cfg.step_timeout, cfg.char_timeout).await;
            match tok {
                Token::Ack => return Ok(None),
                Token::Nak => {
                    local_retries += 1;
                    *retries += 1;
                    if local_retries >= cfg.max_retries {
                        return Err(SessionError::ProtocolError(
                            "peer NAKed our EMSI_DAT past max_retries".to_string(),
                        ));
                    }
                    break; // retransmit
                }
                Token::Req | Token::Hbt | Token::Inq => continue,
                Token::Dat => {
                    let (_, data) = reader
                        .read_emsi_dat(cfg.step_timeout, cfg.char_timeout)
                        .await
                        .map_err(dat_err)?;
                    return Ok(Some(data));
                }
                Token::Cli => {
                    return Err(SessionError::ProtocolError("peer sent CLI during TX".to_string()));
                }
                Token::Timeout => {
                    local_retries += 1;
                    *retries += 1;
                    if local_retries >= cfg.max_retries {
                        return Err(SessionError::Timeout);
                    }
                    break; // retransmit
                }
                Token::CarrierLost => return Err(SessionError::CarrierLost),
                Token::IoError(e) => return Err(SessionError::IoError(e)),
            }
        }
    }
}

/// Phase RX — receive the remote's DAT, ACKing it once validated.
async fn phase_rx<S, W>(
    reader: &mut CharReader<S>,
    writer: &mut W,
    cfg: &SessionConfig,
    identity: &SessionIdentity,
    retries: &mut u32,
) -> Result<EmsiData, SessionError>
where
    S: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut attempt = 0u32;
    loop {
        let skip_send = attempt == 0 && cfg.skip_first_rx_req;
        if !skip_send {
            let packet = if attempt > 0 && cfg.send_nak_on_retry {
                "**EMSI_NAKEEC3"
            } else {
                "**EMSI_REQA77E"
            };
            write_packet(writer, packet).await?;
        }

        loop {
            let tok = reader.read_token(cfg.step_timeout, cfg.char_timeout).await;
            match tok {
                Token::Dat => match reader.read_emsi_dat(cfg.step_timeout, cfg.char_timeout).await {
                    Ok((_, data)) => {
                        write_packet(writer, "**EMSI_ACKA490").await?;
                        if cfg.send_ack_twice {
                            write_packet(writer, "**EMSI_ACKA490").await?;
                        }
                        return Ok(data);
                    }
                    Err(e) => {
                        attempt += 1;
                        *retries += 1;
                        if attempt >= cfg.max_retries {
                            return Err(dat_err(e));
                        }
                        break; // RX_SEND_REQ again
                    }
                },
                Token::Hbt => continue,
                Token::Inq => break, // remote restarting: resend REQ
                Token::Req | Token::Nak => {
                    // Remote is confused; briefly resend our DAT then come
                    // back to waiting for theirs (spec §4.2 Phase RX).
                    let packet = build_emsi_dat_packet(identity);
                    write_packet(writer, &packet).await?;
                }
                Token::Ack => continue, // stale ACK from a previous exchange
                Token::Timeout => {
                    attempt += 1;
                    *retries += 1;
                    if attempt >= cfg.max_retries {
                        return Err(SessionError::Timeout);
                    }
                    break;
                }
                Token::CarrierLost => return Err(SessionError::CarrierLost),
                Token::IoError(e) => return Err(SessionError::IoError(e)),
                Token::Cli => {
                    return Err(SessionError::ProtocolError("peer sent CLI during RX".to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dat::IdentRecord;
    use tokio::io::{duplex, DuplexStream};

    struct TestStream(DuplexStream);

    impl tokio::io::AsyncRead for TestStream {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }
    impl AsyncWrite for TestStream {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.0).poll_write(cx, buf)
        }
        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_flush(cx)
        }
        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_shutdown(cx)
        }
    }
    impl EmsiStream for TestStream {
        fn hangup(
            &mut self,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn sample_identity() -> SessionIdentity {
        EmsiData {
            addresses: vec!["2:5001/100".parse().unwrap()],
            password: String::new(),
            link_codes: vec!["8N1".to_string()],
            compat_codes: vec!["NCP".to_string()],
            mailer_product_code: "FE".to_string(),
            mailer_name: "FidoTest".to_string(),
            mailer_version: "1.0".to_string(),
            mailer_serial: "00000000".to_string(),
            ident: IdentRecord {
                system: "Test System".to_string(),
                location: "Nowhere".to_string(),
                sysop: "Sysop".to_string(),
                phone: "-Unpublished-".to_string(),
                speed: "33600".to_string(),
                flags: vec!["XX".to_string()],
            },
            trx: None,
            moh: None,
            traf: None,
            ohfr: None,
        }
    }

    #[tokio::test]
    async fn master_timeout_with_only_banner_reports_timeout() {
        let (mut peer, mine) = duplex(4096);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = peer.write_all(b"GreatBBS v1.0 Welcome!\r\n").await;
            std::mem::forget(peer);
        });
        let mut cfg = SessionConfig::default();
        cfg.master_timeout = Duration::from_millis(200);
        cfg.first_step_timeout = Duration::from_millis(200);
        cfg.char_timeout = Duration::from_millis(50);

        let (_, outcome) = run_session(TestStream(mine), &cfg, &sample_identity()).await;
        assert!(!outcome.success());
        assert_eq!(outcome.error, Some(SessionError::Timeout));
        assert!(outcome.banner.contains("GreatBBS"));
    }

    #[tokio::test]
    async fn req_flow_with_mutual_dat_exchange_succeeds() {
        // Mirrors spec §8 scenario 1: peer sends REQ, we send DAT, peer
        // ACKs, peer sends its own DAT, we ACK back.
        let (mut peer, mine) = duplex(8192);
        let remote_packet = build_emsi_dat_packet(&sample_identity());
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            peer.write_all(b"**EMSI_REQA77E\r").await.unwrap();

            let mut buf = [0u8; 4096];
            let _ = peer.read(&mut buf).await; // drain our DAT
            peer.write_all(b"**EMSI_ACKA490\r").await.unwrap();

            peer.write_all(remote_packet.as_bytes()).await.unwrap();
            peer.write_all(b"\r").await.unwrap();

            let _ = peer.read(&mut buf).await; // drain our ACK
            std::mem::forget(peer);
        });
        let mut cfg = SessionConfig::default();
        cfg.step_timeout = Duration::from_secs(3);
        cfg.char_timeout = Duration::from_secs(1);
        let (_, outcome) = run_session(TestStream(mine), &cfg, &sample_identity()).await;
        assert!(outcome.error.is_none(), "unexpected error: {:?}", outcome.error);
        assert!(outcome.success());
    }
}
