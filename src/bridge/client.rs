//! Privileged side of the bridge
//!
//! One background task owns the connection. Events are handed over through a
//! single-slot watch channel, so `send` never blocks and a newer event
//! replaces one not yet written. Events sent while disconnected are dropped.
//!
//! Every successful connect bumps a connection epoch. A sender that sees a
//! new epoch asks the poller to publish its current state again, so a
//! restarted server learns the layer on the next poll instead of the next
//! layer change.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::wire;
use super::BridgeError;
use crate::backoff::Backoff;
use crate::layer::LayerChanged;
use crate::poller::LayerEventSink;
use crate::shutdown::stopped;

/// Cloneable, non-blocking sending end
#[derive(Clone)]
pub struct BridgeSender {
    slot: Arc<watch::Sender<Option<LayerChanged>>>,
    connected: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
    /// Last connection epoch this sender resynced for
    seen_epoch: u64,
}

impl BridgeSender {
    /// Hand an event to the connection task
    ///
    /// Returns false if the bridge is disconnected and the event was dropped.
    pub fn send(&self, event: LayerChanged) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            debug!("Bridge disconnected, dropping {}", event);
            return false;
        }
        self.slot.send_replace(Some(event));
        true
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// True once per connection established since the last call
    pub fn take_new_connection(&mut self) -> bool {
        let epoch = self.epoch.load(Ordering::SeqCst);
        if epoch == self.seen_epoch {
            return false;
        }
        self.seen_epoch = epoch;
        true
    }
}

impl LayerEventSink for BridgeSender {
    fn publish(&mut self, event: LayerChanged) {
        self.send(event);
    }

    fn take_resync(&mut self) -> bool {
        self.take_new_connection()
    }
}

/// Persistent connection to the bridge socket
pub struct BridgeClient {
    sender: BridgeSender,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl BridgeClient {
    /// Start connecting in the background
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(socket_path: impl Into<PathBuf>, backoff: Backoff) -> Self {
        let socket_path = socket_path.into();
        let (slot, rx) = watch::channel(None);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));
        let epoch = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(run(
            socket_path,
            backoff,
            rx,
            Link {
                connected: Arc::clone(&connected),
                epoch: Arc::clone(&epoch),
            },
            shutdown_rx,
        ));

        Self {
            sender: BridgeSender {
                slot: Arc::new(slot),
                connected,
                epoch,
                seen_epoch: 0,
            },
            shutdown,
            task: Some(task),
        }
    }

    /// See [`BridgeSender::send`]
    pub fn send(&self, event: LayerChanged) -> bool {
        self.sender.send(event)
    }

    pub fn sender(&self) -> BridgeSender {
        self.sender.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    /// Close the connection and wait for the task to finish
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Connection status shared with the senders
struct Link {
    connected: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
}

async fn connect(path: &Path) -> Result<UnixStream, BridgeError> {
    UnixStream::connect(path).await.map_err(|e| {
        BridgeError::ConnectionRefused(format!("{}: {}", path.display(), e))
    })
}

async fn run(
    socket_path: PathBuf,
    mut backoff: Backoff,
    mut rx: watch::Receiver<Option<LayerChanged>>,
    link: Link,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut refused_logged = false;
    loop {
        if *shutdown.borrow() {
            break;
        }
        match connect(&socket_path).await {
            Ok(stream) => {
                info!("Connected to bridge at {}", socket_path.display());
                refused_logged = false;
                backoff.reset();
                // Anything left in the slot predates this connection; the
                // epoch bump makes the poller publish current state instead
                let _ = rx.borrow_and_update();
                link.connected.store(true, Ordering::SeqCst);
                link.epoch.fetch_add(1, Ordering::SeqCst);
                let result = session(stream, &mut rx, &mut shutdown).await;
                link.connected.store(false, Ordering::SeqCst);
                match result {
                    Ok(()) => break,
                    Err(e) => warn!("Bridge: {}", e),
                }
            }
            Err(e) if !refused_logged => {
                warn!("{}; retrying", e);
                refused_logged = true;
            }
            Err(e) => debug!("{}", e),
        }

        let delay = backoff.next_delay();
        trace!("Reconnecting in {:?}", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stopped(&mut shutdown) => break,
        }
    }
    debug!("Bridge client stopped");
}

/// Drive one connection; `Ok` means shutdown was requested
async fn session(
    stream: UnixStream,
    rx: &mut watch::Receiver<Option<LayerChanged>>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), BridgeError> {
    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 64];
    loop {
        tokio::select! {
            _ = stopped(shutdown) => return Ok(()),
            changed = rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let event = rx.borrow_and_update().clone();
                let Some(event) = event else { continue };
                match wire::encode(&event) {
                    Ok(frame) => {
                        writer
                            .write_all(&frame)
                            .await
                            .map_err(|_| BridgeError::ConnectionLost)?;
                        debug!("Sent {}", event);
                    }
                    Err(e) => warn!("Not sending {}: {}", event, e),
                }
            }
            read = reader.read(&mut scratch) => match read {
                // The server never writes; EOF means it closed or superseded us
                Ok(0) | Err(_) => return Err(BridgeError::ConnectionLost),
                Ok(n) => trace!("Ignoring {} unexpected bytes from server", n),
            },
        }
    }
}
