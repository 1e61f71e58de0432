//! Direct forwarding from the poller thread to a sink
//!
//! Used when the poller runs inside the desktop session and can reach the
//! bus itself. The handoff is a single slot: a slow sink sees only the
//! newest event.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::LayerSink;
use crate::layer::LayerChanged;
use crate::poller::LayerEventSink;
use crate::shutdown::stopped;

/// Poller-side end of the forwarder
#[derive(Clone)]
pub struct ForwardHandle {
    tx: Arc<watch::Sender<Option<LayerChanged>>>,
}

impl LayerEventSink for ForwardHandle {
    fn publish(&mut self, event: LayerChanged) {
        self.tx.send_replace(Some(event));
    }
}

/// Spawn the forwarding task
///
/// The task ends when `shutdown` turns true or every handle is dropped.
pub fn spawn_forwarder(
    sink: Arc<dyn LayerSink>,
    mut shutdown: watch::Receiver<bool>,
) -> (ForwardHandle, JoinHandle<()>) {
    let (tx, mut rx) = watch::channel(None::<LayerChanged>);
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let event = rx.borrow_and_update().clone();
                    if let Some(event) = event {
                        if let Err(e) = sink.set_layer(&event).await {
                            warn!("{}; dropping {}", e, event);
                        }
                    }
                }
            }
        }
        debug!("Forwarder stopped");
    });
    (ForwardHandle { tx: Arc::new(tx) }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<LayerChanged>>);

    #[async_trait]
    impl LayerSink for Recorder {
        async fn set_layer(&self, event: &LayerChanged) -> Result<(), BusError> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_forwards_published_events() {
        let recorder = Arc::new(Recorder::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (mut handle, task) = spawn_forwarder(recorder.clone(), stop_rx);

        handle.publish(LayerChanged::new("Lower", "#FF3232"));
        for _ in 0..100 {
            if !recorder.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            &[LayerChanged::new("Lower", "#FF3232")]
        );

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
