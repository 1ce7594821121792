//! Wraps a dialed modem call as an [`emsi::EmsiStream`] (spec §4.3's
//! "duck-typed transport" — the same trait a `TcpStream` implements).
//!
//! Reads and writes go through the byte channels [`crate::modem::Modem`]
//! hands back once a dial connects; `hangup` drives the real DTR-drop or
//! escape-sequence teardown, and `Drop`/`AsyncWrite::poll_shutdown` stay a
//! no-op — callers must call `hangup()` explicitly so they can branch to a
//! reset on failure.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use emsi::EmsiStream;

use crate::config::HangupMethod;
use crate::modem::{DataChannels, Modem};

type SendFuture = Pin<Box<dyn Future<Output = Result<(), mpsc::error::SendError<Vec<u8>>>> + Send>>;

/// The data-mode half of a dialed call.
pub struct ModemConn {
    modem: Modem,
    read_rx: mpsc::Receiver<Vec<u8>>,
    write_tx: mpsc::Sender<Vec<u8>>,
    hangup_method: HangupMethod,
    read_buf: Vec<u8>,
    read_pos: usize,
    read_eof: bool,
    pending_write: Option<(usize, SendFuture)>,
}

impl ModemConn {
    pub fn new(modem: Modem, channels: DataChannels, hangup_method: HangupMethod) -> Self {
        Self {
            modem,
            read_rx: channels.read_rx,
            write_tx: channels.write_tx,
            hangup_method,
            read_buf: Vec::new(),
            read_pos: 0,
            read_eof: false,
            pending_write: None,
        }
    }
}

impl AsyncRead for ModemConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if self.read_pos < self.read_buf.len() {
                let available = &self.read_buf[self.read_pos..];
                let n = available.len().min(out.remaining());
                out.put_slice(&available[..n]);
                self.read_pos += n;
                return Poll::Ready(Ok(()));
            }
            if self.read_eof {
                return Poll::Ready(Ok(()));
            }
            match self.read_rx.poll_recv(cx) {
                Poll::Ready(Some(bytes)) => {
                    self.read_buf = bytes;
                    self.read_pos = 0;
                }
                Poll::Ready(None) => {
                    self.read_eof = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for ModemConn {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        loop {
            if let Some((len, fut)) = self.pending_write.as_mut() {
                let len = *len;
                match fut.as_mut().poll(cx) {
                    Poll::Ready(Ok(())) => {
                        self.pending_write = None;
                        return Poll::Ready(Ok(len));
                    }
                    Poll::Ready(Err(_)) => {
                        self.pending_write = None;
                        return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "modem call ended")));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }
            let tx = self.write_tx.clone();
            let data = buf.to_vec();
            let len = data.len();
            let fut: SendFuture = Box::pin(async move { tx.send(data).await });
            self.pending_write = Some((len, fut));
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // No-op by design: the caller must call `hangup()` to end a call.
        Poll::Ready(Ok(()))
    }
}

impl EmsiStream for ModemConn {
    fn hangup(&mut self) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
        Box::pin(async move { self.modem.hangup(self.hangup_method).await.map_err(|e| e.to_string()) })
    }
}
