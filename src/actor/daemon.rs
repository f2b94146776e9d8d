//! Loopback TCP listener that feeds framed messages to the dispatcher.
//!
//! Frame: `u32` name length (big-endian), name bytes (UTF-8), `u32` payload
//! length, payload bytes. A connection carries any number of frames.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdListener};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub const MAX_FRAME_PART: u32 = 64 * 1024;

/// Called once per frame with the message name and payload.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) -> bool + Send + Sync>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("could not bind port {port}: {source}")]
    Bind { port: u16, source: io::Error },
    #[error("could not start the daemon runtime: {0}")]
    Runtime(io::Error),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("frame part of {0} bytes exceeds the {MAX_FRAME_PART} byte limit")]
    TooLarge(usize),
    #[error("message name is not UTF-8")]
    InvalidName,
}

pub struct Daemon {
    addr: SocketAddr,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl Daemon {
    pub fn start(port: u16, handler: MessageHandler) -> Result<Self, DaemonError> {
        let listener = StdListener::bind((Ipv4Addr::LOCALHOST, port))
            .map_err(|source| DaemonError::Bind { port, source })?;
        let addr = listener.local_addr().map_err(|source| DaemonError::Bind { port, source })?;
        listener.set_nonblocking(true).map_err(|source| DaemonError::Bind { port, source })?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .thread_name("daemon")
            .build()
            .map_err(DaemonError::Runtime)?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name("daemon".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    match TcpListener::from_std(listener) {
                        Ok(listener) => accept_loop(listener, handler, token).await,
                        Err(e) => error!(%e, "could not register daemon listener"),
                    }
                });
            })
            .map_err(DaemonError::Runtime)?;

        info!(%addr, "daemon listening");
        Ok(Daemon { addr, cancel, thread: Some(thread) })
    }

    pub fn local_addr(&self) -> SocketAddr { self.addr }

    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.cancel.cancel();
        if thread.join().is_err() {
            warn!("daemon thread panicked");
        }
        info!(addr = %self.addr, "daemon stopped");
    }
}

impl Drop for Daemon {
    fn drop(&mut self) { self.stop(); }
}

async fn accept_loop(listener: TcpListener, handler: MessageHandler, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let span = info_span!("daemon connection", %peer);
                    tokio::spawn(serve(stream, handler.clone(), cancel.clone()).instrument(span));
                }
                Err(e) => warn!(%e, "accept failed"),
            },
        }
    }
}

async fn serve(mut stream: TcpStream, handler: MessageHandler, cancel: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = read_frame(&mut stream) => frame,
        };
        match frame {
            Ok(Some((name, payload))) => {
                let handled = handler(&name, &payload);
                debug!(name = name.as_str(), len = payload.len(), handled, "plugin daemon message");
            }
            Ok(None) => return,
            Err(e) => {
                warn!(%e, "dropping connection");
                return;
            }
        }
    }
}

/// `Ok(None)` on a clean end of stream between frames.
async fn read_frame(stream: &mut TcpStream) -> Result<Option<(String, Vec<u8>)>, FrameError> {
    let name_len = match stream.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let name = read_part(stream, name_len).await?;
    let name = String::from_utf8(name).map_err(|_| FrameError::InvalidName)?;
    let payload_len = stream.read_u32().await?;
    let payload = read_part(stream, payload_len).await?;
    Ok(Some((name, payload)))
}

async fn read_part(stream: &mut TcpStream, len: u32) -> Result<Vec<u8>, FrameError> {
    let len = checked_part_len(len as usize)?;
    let mut buf = vec![0; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

fn checked_part_len(len: usize) -> Result<u32, FrameError> {
    match u32::try_from(len) {
        Ok(len) if len <= MAX_FRAME_PART => Ok(len),
        _ => Err(FrameError::TooLarge(len)),
    }
}

/// Encodes one frame in the daemon's wire format. Parts the daemon would
/// refuse are rejected here too.
pub fn encode_frame(name: &str, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let name_len = checked_part_len(name.len())?;
    let payload_len = checked_part_len(payload.len())?;
    let mut out = Vec::with_capacity(8 + name.len() + payload.len());
    out.extend_from_slice(&name_len.to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&payload_len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
