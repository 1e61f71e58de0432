//! Session side of the bridge
//!
//! Owns the socket path for as long as it lives. Only one connection is
//! served at a time: a new connection closes the previous one, so the latest
//! privileged process wins.
//!
//! Ownership of the path is an exclusive `flock` on `<socket>.lock`, held
//! until the server is dropped. A second server fails on the lock without
//! ever connecting to the live socket, so it cannot supersede the live
//! server's client.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::wire::FrameDecoder;
use super::BridgeError;
use crate::bus::LayerSink;
use crate::shutdown::stopped;

/// Removes the socket file when the server goes away
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!("Removed {}", self.0.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.0.display(), e),
        }
    }
}

/// Lock file next to the socket: `<socket>.lock`
pub fn lock_path(socket: &Path) -> PathBuf {
    let mut name = OsString::from(socket.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

/// Take the exclusive lock guarding `socket`
///
/// The lock lives as long as the returned file; the kernel releases it when
/// the process dies, so a crashed server never blocks the next one.
fn lock_socket(socket: &Path) -> Result<File, BridgeError> {
    let path = lock_path(socket);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(&path)?;
    // SAFETY: the descriptor is owned by `file` and open for the whole call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let e = std::io::Error::last_os_error();
        if e.kind() == std::io::ErrorKind::WouldBlock {
            return Err(BridgeError::AddressInUse(socket.to_path_buf()));
        }
        return Err(e.into());
    }
    debug!("Locked {}", path.display());
    Ok(file)
}

/// Listener bound to the bridge socket
pub struct BridgeServer {
    listener: UnixListener,
    // Field order matters: the socket file goes before the lock is released
    socket: SocketFile,
    _lock: File,
}

impl BridgeServer {
    /// Bind the socket path
    ///
    /// Fails with `AddressInUse` while another server holds the path. A
    /// socket file left behind by a dead server is removed.
    pub async fn bind(path: &Path, mode: u32) -> Result<Self, BridgeError> {
        let lock = lock_socket(path)?;

        match std::fs::remove_file(path) {
            Ok(()) => info!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                BridgeError::AddressInUse(path.to_path_buf())
            } else {
                BridgeError::Io(e)
            }
        })?;
        let socket = SocketFile(path.to_path_buf());

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        info!("Bridge listening on {} (mode {:o})", path.display(), mode);

        Ok(Self {
            listener,
            socket,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.socket.0
    }

    /// Accept connections until `shutdown` turns true
    ///
    /// Returning (or dropping the future) closes the listener and the active
    /// connection, and removes the socket file.
    pub async fn run(self, sink: Arc<dyn LayerSink>, mut shutdown: watch::Receiver<bool>) {
        let mut current: Option<JoinHandle<()>> = None;
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        if let Some(previous) = current.take() {
                            if !previous.is_finished() {
                                info!("New bridge connection supersedes the previous one");
                                previous.abort();
                            }
                        }
                        info!("Bridge client connected");
                        current = Some(tokio::spawn(serve_connection(stream, Arc::clone(&sink))));
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }
        if let Some(conn) = current {
            conn.abort();
        }
        info!("Bridge server shutting down");
    }
}

/// Read one connection sequentially, forwarding each message to the sink
async fn serve_connection(mut stream: UnixStream, sink: Arc<dyn LayerSink>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                debug!("Bridge client closed the connection");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("Bridge read failed: {}", e);
                return;
            }
        };
        decoder.extend(&buf[..n]);
        loop {
            match decoder.next_message() {
                Ok(Some(event)) => {
                    debug!("Received {}", event);
                    if let Err(e) = sink.set_layer(&event).await {
                        warn!("{}; dropping {}", e, event);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("{}; dropping connection", e);
                    return;
                }
            }
        }
    }
}
