//! The "bidirectional byte stream with deadlines and close" abstraction
//! (spec §9: "duck-typed net.Conn reuse across TCP and modem"). A TCP
//! socket and a modem's wrapped serial connection both implement it; an
//! `EmsiStream`'s `Close` is deliberately a no-op — callers hang up
//! explicitly so they can branch to a reset on failure (spec §4.3).

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Everything an EMSI session needs from its transport.
///
/// `AsyncRead + AsyncWrite` give it byte I/O; `hangup`/`reset` give it the
/// explicit lifecycle spec §4.3 requires instead of implicit `Drop`-based
/// close.
pub trait EmsiStream: AsyncRead + AsyncWrite + Unpin + Send {
    /// Politely end the connection (TCP: shutdown the socket; modem: DTR
    /// drop or escape sequence per configured `hangup_method`).
    fn hangup(&mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send + '_>>;
}

impl EmsiStream for TcpStream {
    fn hangup(&mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send + '_>> {
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            self.shutdown().await.map_err(|e| e.to_string())
        })
    }
}
