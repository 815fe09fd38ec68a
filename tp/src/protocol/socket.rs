//! Unix-domain socket transport for process mode
//!
//! The controller binds a [`SocketHub`]; each worker process opens one
//! [`SocketLink`] to it. Envelopes travel as newline-delimited JSON. Every
//! inbound line lands in a single selective-receive mailbox, and replies are
//! written back on the connection their destination worker spoke from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::id::WorkerId;

use super::channel::{ControllerChannel, WorkerChannel};
use super::error::ProtocolError;
use super::handshake::Phase;
use super::mailbox::Mailbox;
use super::messages::{Envelope, ReplyMessage, TokenMessage};

/// Longest line accepted from a peer
const MAX_LINE_SIZE: usize = 1024;

type Routes = Arc<Mutex<HashMap<WorkerId, OwnedWriteHalf>>>;

/// One line read from a peer with the size limit applied
#[derive(Debug, PartialEq, Eq)]
enum PeerLine {
    Text(String),
    /// Longer than [`MAX_LINE_SIZE`]; this many bytes were read and dropped
    Oversized(usize),
    Eof,
}

/// Read the next line without ever buffering more than the limit
///
/// An oversized line is consumed in bounded chunks up to its newline and
/// reported without its contents.
async fn read_peer_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<PeerLine> {
    let limit = MAX_LINE_SIZE as u64 + 1;
    let mut buf = Vec::new();

    let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(PeerLine::Eof);
    }
    if buf.last() == Some(&b'\n') || buf.len() <= MAX_LINE_SIZE {
        return Ok(PeerLine::Text(String::from_utf8_lossy(&buf).into_owned()));
    }

    let mut dropped = buf.len();
    loop {
        buf.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
        dropped += n;
        if n == 0 || buf.last() == Some(&b'\n') {
            return Ok(PeerLine::Oversized(dropped));
        }
    }
}

/// Bind a listener, creating the parent directory and clearing a stale socket
fn create_listener_at(socket_path: &Path) -> Result<UnixListener, ProtocolError> {
    debug!(?socket_path, "create_listener_at: called");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: removing stale socket");
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    debug!(?socket_path, "create_listener_at: socket bound");
    Ok(listener)
}

/// Remove the socket file, logging rather than failing
fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Controller end of the socket transport
pub struct SocketHub {
    path: PathBuf,
    inbound: Arc<Mailbox>,
    routes: Routes,
    acceptor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SocketHub {
    /// Bind at `path` and start accepting worker connections
    pub fn bind(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref().to_path_buf();
        let listener = create_listener_at(&path)?;
        info!(socket = %path.display(), "Listening for workers");

        let inbound = Arc::new(Mailbox::new());
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let acceptor = tokio::spawn(accept_loop(listener, inbound.clone(), routes.clone()));

        Ok(Self {
            path,
            inbound,
            routes,
            acceptor: std::sync::Mutex::new(Some(acceptor)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Workers with a live connection
    pub async fn connected(&self) -> usize {
        self.routes.lock().await.len()
    }

    fn stop_accepting(&self) {
        if let Ok(mut acceptor) = self.acceptor.lock()
            && let Some(handle) = acceptor.take()
        {
            handle.abort();
        }
    }
}

async fn accept_loop(listener: UnixListener, inbound: Arc<Mailbox>, routes: Routes) {
    // Dropping the set when this task is aborted aborts every reader with it
    let mut readers = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                debug!("accept_loop: worker connected");
                readers.spawn(read_connection(stream, inbound.clone(), routes.clone()));
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept worker connection");
            }
        }
        while readers.try_join_next().is_some() {}
    }
}

async fn read_connection(stream: UnixStream, inbound: Arc<Mailbox>, routes: Routes) {
    let (read, write) = stream.into_split();
    let mut write = Some(write);
    let mut peer = None;
    let mut reader = BufReader::new(read);

    loop {
        let line = match read_peer_line(&mut reader).await {
            Ok(PeerLine::Text(line)) => line,
            Ok(PeerLine::Oversized(bytes)) => {
                warn!(?peer, bytes, "Dropping oversized line from worker");
                continue;
            }
            Ok(PeerLine::Eof) => break,
            Err(e) => {
                warn!(?peer, error = %e, "Worker connection failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let env = match Envelope::decode(&line) {
            Ok(env) => env,
            Err(e) => {
                warn!(?peer, error = %e, "Dropping malformed line from worker");
                continue;
            }
        };

        // The first envelope on a connection names the worker behind it
        if let Some(half) = write.take() {
            let id = env.sender();
            debug!(%id, "read_connection: registering route");
            routes.lock().await.insert(id, half);
            peer = Some(id);
        }

        if inbound.push(env).await.is_err() {
            break;
        }
    }

    if let Some(id) = peer {
        debug!(%id, "read_connection: worker disconnected");
        routes.lock().await.remove(&id);
    }
}

#[async_trait]
impl ControllerChannel for SocketHub {
    async fn recv(&self, phase: Phase) -> Result<Envelope, ProtocolError> {
        self.inbound.take(|env| phase.admits(env)).await
    }

    async fn reply(&self, reply: ReplyMessage) -> Result<(), ProtocolError> {
        let line = Envelope::from(reply).encode()?;
        let mut routes = self.routes.lock().await;
        let writer = routes.get_mut(&reply.to).ok_or(ProtocolError::NoRoute(reply.to))?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        debug!(socket = %self.path.display(), "SocketHub::close: called");
        self.stop_accepting();
        self.inbound.close().await;
        // Dropping the write halves shows EOF to every connected worker
        self.routes.lock().await.clear();
    }
}

impl Drop for SocketHub {
    fn drop(&mut self) {
        self.stop_accepting();
        cleanup_socket(&self.path);
    }
}

/// Worker end of the socket transport
pub struct SocketLink {
    reader: Mutex<Lines<BufReader<OwnedReadHalf>>>,
    writer: Mutex<OwnedWriteHalf>,
}

impl SocketLink {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        debug!(socket = %path.display(), "SocketLink::connect: called");
        let stream = UnixStream::connect(path).await?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(BufReader::new(read).lines()),
            writer: Mutex::new(write),
        })
    }
}

#[async_trait]
impl WorkerChannel for SocketLink {
    async fn send(&self, msg: TokenMessage) -> Result<(), ProtocolError> {
        let line = Envelope::from(msg).encode()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv_reply(&self, me: WorkerId) -> Result<ReplyMessage, ProtocolError> {
        let mut reader = self.reader.lock().await;
        let line = reader.next_line().await?.ok_or(ProtocolError::Closed)?;
        let reply = ReplyMessage::from(Envelope::decode(&line)?);
        if reply.to != me {
            return Err(ProtocolError::Misaddressed {
                expected: me,
                got: reply.to,
            });
        }
        Ok(reply)
    }
}
