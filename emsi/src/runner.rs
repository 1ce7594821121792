//! Shared test execution (spec §4.5), used by both the modem daemon and
//! server-side IP tests. Dialing/connecting happens before this is called;
//! this module owns only "run the handshake over an already-open stream,
//! then hang up."

use std::time::{Duration, Instant};

use fidotest_common::address_list_contains;

use crate::dat::EmsiData;
use crate::session::{run_session, SessionConfig, SessionError, SessionIdentity};
use crate::stream::EmsiStream;

/// Result of one `run_test` call (spec §4.5 steps 3-6).
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub success: bool,
    pub remote: Option<EmsiData>,
    pub banner: String,
    pub address_valid: bool,
    pub retries: u32,
    pub reason: Option<String>,
    pub duration: Duration,
    /// True if `hangup()` itself failed — the caller (which owns the
    /// physical device, e.g. the modem daemon) should attempt a Reset.
    pub hangup_failed: bool,
}

/// Run one EMSI session over `stream` and hang up, returning `stream` so
/// the caller can reuse or drop it as appropriate (spec §9: close is a
/// no-op, hangup ownership stays with the caller).
pub async fn run_test<S: EmsiStream>(
    stream: S,
    cfg: &SessionConfig,
    identity: &SessionIdentity,
    expected_address: &fidotest_common::Address,
) -> (S, TestOutcome) {
    let started = Instant::now();
    let (mut stream, session_outcome) = run_session(stream, cfg, identity).await;
    let duration = started.elapsed();

    let address_valid = session_outcome
        .remote
        .as_ref()
        .is_some_and(|r| address_list_contains(&r.addresses, expected_address));

    let hangup_failed = stream.hangup().await.is_err();

    let outcome = TestOutcome {
        success: session_outcome.success() && address_valid,
        remote: session_outcome.remote,
        banner: session_outcome.banner,
        address_valid,
        retries: session_outcome.retries,
        reason: session_outcome.error.as_ref().map(session_error_reason),
        duration,
        hangup_failed,
    };
    (stream, outcome)
}

fn session_error_reason(e: &SessionError) -> String {
    e.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dat::IdentRecord;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

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

    fn identity_for(addr: &str) -> SessionIdentity {
        EmsiData {
            addresses: vec![addr.parse().unwrap()],
            password: String::new(),
            link_codes: vec!["8N1".to_string()],
            compat_codes: vec!["NCP".to_string()],
            mailer_product_code: "FE".to_string(),
            mailer_name: "FidoTest".to_string(),
            mailer_version: "1.0".to_string(),
            mailer_serial: "00000000".to_string(),
            ident: IdentRecord {
                system: "Test".to_string(),
                location: "Nowhere".to_string(),
                sysop: "Sysop".to_string(),
                phone: "-Unpublished-".to_string(),
                speed: "33600".to_string(),
                flags: vec![],
            },
            trx: None,
            moh: None,
            traf: None,
            ohfr: None,
        }
    }

    #[tokio::test]
    async fn address_mismatch_marks_test_unsuccessful_even_on_clean_handshake() {
        let (mut peer, mine) = duplex(8192);
        let remote_packet = crate::dat::build_emsi_dat_packet(&identity_for("1:1/1"));
        tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            peer.write_all(b"**EMSI_REQA77E\r").await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = peer.read(&mut buf).await;
            peer.write_all(b"**EMSI_ACKA490\r").await.unwrap();
            peer.write_all(remote_packet.as_bytes()).await.unwrap();
            peer.write_all(b"\r").await.unwrap();
            let _ = peer.read(&mut buf).await;
            std::mem::forget(peer);
        });
        let mut cfg = SessionConfig::default();
        cfg.step_timeout = Duration::from_secs(3);
        cfg.char_timeout = Duration::from_secs(1);

        let expected: fidotest_common::Address = "2:5001/100".parse().unwrap();
        let (_, outcome) = run_test(TestStream(mine), &cfg, &identity_for("2:5001/100"), &expected).await;
        assert!(!outcome.success);
        assert!(!outcome.address_valid);
        assert!(!outcome.hangup_failed);
    }
}
