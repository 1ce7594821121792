//! Integration coverage for the EMSI session FSM (spec §8 scenarios 1-5),
//! each driven over an in-memory `tokio::io::duplex` pipe with a simulated
//! peer task on one end and `run_session` on the other. Scenarios 6 (daemon
//! two-tier retry) and 7 (prefix routing) aren't EMSI-session scenarios —
//! they're covered by the daemon loop and `common::phone` tests instead.

use std::time::Duration;

use emsi::{
    build_emsi_dat_packet, run_session, EmsiData, EmsiStream, IdentRecord, SessionConfig,
    SessionError,
};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

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
impl tokio::io::AsyncWrite for TestStream {
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

fn sample_identity() -> EmsiData {
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

fn quick_cfg() -> SessionConfig {
    let mut cfg = SessionConfig::default();
    cfg.step_timeout = Duration::from_secs(3);
    cfg.first_step_timeout = Duration::from_secs(3);
    cfg.char_timeout = Duration::from_secs(1);
    cfg
}

/// Scenario 1: peer sends REQ, we send DAT, peer ACKs, peer sends its own
/// DAT, we ACK back.
#[tokio::test]
async fn scenario_1_req_flow_with_mutual_dat_exchange_succeeds() {
    let (mut peer, mine) = duplex(8192);
    let remote_packet = build_emsi_dat_packet(&sample_identity());
    tokio::spawn(async move {
        peer.write_all(b"**EMSI_REQA77E\r").await.unwrap();

        let mut buf = [0u8; 4096];
        let _ = peer.read(&mut buf).await; // drain our DAT
        peer.write_all(b"**EMSI_ACKA490\r").await.unwrap();

        peer.write_all(remote_packet.as_bytes()).await.unwrap();
        peer.write_all(b"\r").await.unwrap();

        let _ = peer.read(&mut buf).await; // drain our ACK
        std::mem::forget(peer);
    });

    let (_, outcome) = run_session(TestStream(mine), &quick_cfg(), &sample_identity()).await;
    assert!(outcome.success(), "unexpected error: {:?}", outcome.error);
    assert_eq!(outcome.retries, 0);
}

/// Scenario 2: peer sends its EMSI_DAT directly after connect, before any
/// INQ/REQ. We parse it, ACK it, then enter TX phase with our own DAT.
#[tokio::test]
async fn scenario_2_peer_sends_dat_before_inq_or_req() {
    let (mut peer, mine) = duplex(8192);
    let remote_packet = build_emsi_dat_packet(&sample_identity());
    tokio::spawn(async move {
        // Independent duplex buffers in each direction mean this doesn't
        // need to wait for our ACK before queuing its own: both land in
        // the peer->mine buffer in write order, which is all that matters.
        peer.write_all(remote_packet.as_bytes()).await.unwrap();
        peer.write_all(b"\r").await.unwrap();
        peer.write_all(b"**EMSI_ACKA490\r").await.unwrap();
        std::mem::forget(peer);
    });

    let (_, outcome) = run_session(TestStream(mine), &quick_cfg(), &sample_identity()).await;
    assert!(outcome.success(), "unexpected error: {:?}", outcome.error);
    assert!(outcome.remote.is_some());
}

/// Scenario 3: peer NAKs our first EMSI_DAT once, we retransmit, peer ACKs
/// the retransmission. Exercises the `retries` bookkeeping in `phase_tx`.
#[tokio::test]
async fn scenario_3_nak_retry_then_ack_succeeds_with_one_retry() {
    let (mut peer, mine) = duplex(8192);
    let remote_packet = build_emsi_dat_packet(&sample_identity());
    tokio::spawn(async move {
        peer.write_all(b"**EMSI_REQA77E\r").await.unwrap();

        let mut buf = [0u8; 4096];
        let _ = peer.read(&mut buf).await; // drain our first DAT
        peer.write_all(b"**EMSI_NAKEEC3\r").await.unwrap();

        let _ = peer.read(&mut buf).await; // drain our retransmitted DAT
        peer.write_all(b"**EMSI_ACKA490\r").await.unwrap();

        let _ = peer.read(&mut buf).await; // drain our REQ for phase_rx
        peer.write_all(remote_packet.as_bytes()).await.unwrap();
        peer.write_all(b"\r").await.unwrap();

        let _ = peer.read(&mut buf).await; // drain our ACK
        std::mem::forget(peer);
    });

    let (_, outcome) = run_session(TestStream(mine), &quick_cfg(), &sample_identity()).await;
    assert!(outcome.success(), "unexpected error: {:?}", outcome.error);
    assert_eq!(outcome.retries, 1);
}

/// Scenario 4: only a banner arrives and nothing else; master timeout fires.
#[tokio::test]
async fn scenario_4_master_timeout_with_only_banner_reports_timeout() {
    let (mut peer, mine) = duplex(4096);
    tokio::spawn(async move {
        let _ = peer.write_all(b"GreatBBS v1.0 Welcome!\r\n").await;
        std::mem::forget(peer);
    });
    let mut cfg = quick_cfg();
    cfg.master_timeout = Duration::from_millis(200);
    cfg.first_step_timeout = Duration::from_millis(200);
    cfg.char_timeout = Duration::from_millis(50);

    let (_, outcome) = run_session(TestStream(mine), &cfg, &sample_identity()).await;
    assert!(!outcome.success());
    assert_eq!(outcome.error, Some(SessionError::Timeout));
    assert!(outcome.banner.contains("GreatBBS"));
}

/// Scenario 5: carrier lost mid-DAT. Peer triggers our TX phase, then sends
/// a truncated EMSI_DAT packet (declared length far longer than what's
/// actually provided) followed by a "NO CARRIER" line instead of completing
/// it or ACKing.
#[tokio::test]
async fn scenario_5_carrier_loss_mid_dat_reports_carrier_lost() {
    let (mut peer, mine) = duplex(8192);
    tokio::spawn(async move {
        peer.write_all(b"**EMSI_REQA77E\r").await.unwrap();

        let mut buf = [0u8; 4096];
        let _ = peer.read(&mut buf).await; // drain our DAT

        // Declares a 127-byte payload (hex 007F) but only ever supplies a
        // handful of bytes before the line drops.
        peer.write_all(b"**EMSI_DAT007F{EMSI}{trunc}").await.unwrap();
        peer.write_all(b"NO CARRIER\r\n").await.unwrap();
        std::mem::forget(peer);
    });

    let (_, outcome) = run_session(TestStream(mine), &quick_cfg(), &sample_identity()).await;
    assert!(!outcome.success());
    assert_eq!(outcome.error, Some(SessionError::CarrierLost));
}
