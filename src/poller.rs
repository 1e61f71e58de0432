//! Layer poller
//!
//! Owns the keyboard session and turns polled layer state into
//! `LayerChanged` events:
//!
//! ```text
//! Disconnected --find_device ok--> Connected --first read--> Polling
//!      ^                                |                      |
//!      +---- unresponsive / not found --+----------------------+
//! ```
//!
//! While Disconnected the device is looked up again on a backoff schedule.
//! An event is published only when the observed state differs from the last
//! published one, or when the sink asks for a resync after reconnecting.
//! Losing the device forgets that state, so the first read after
//! reconnecting is always published.
//!
//! Keymaps that answer the layer query with 0xFF are followed through the
//! switch matrix instead, if the matrix size is configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use via_keyboard::{LayerState, LayerTracker, MatrixGeometry, ViaKeyboard};
use via_transport::{AmbiguityPolicy, DeviceLocator, HidEnumerator};

use crate::backoff::Backoff;
use crate::config::Config;
use crate::layer::{LayerChanged, LayerTable};

/// Longest uninterrupted sleep, so a stop request is noticed promptly
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Where the poller publishes events
///
/// Implementations must not block.
pub trait LayerEventSink: Send {
    fn publish(&mut self, event: LayerChanged);

    /// True when the consumer may have missed earlier events, e.g. after a
    /// reconnect; the poller then publishes its current state again
    fn take_resync(&mut self) -> bool {
        false
    }
}

/// Poller connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// No device handle
    Disconnected,
    /// Handle open, no state read yet
    Connected,
    /// Reading layer state every interval
    Polling,
}

/// How the layer is read on the current connection
enum LayerSource {
    /// CUSTOM_GET_VALUE layer query
    Query,
    /// Inferred from switch matrix samples
    Matrix(LayerTracker),
    /// The keymap has no layer query and no matrix fallback is possible;
    /// the query is retried slowly
    Unavailable,
}

/// Timing and device settings for the poller
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    /// Sample period while following the switch matrix
    pub matrix_interval: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub request_timeout: Duration,
    pub layer_channel: u8,
    /// Matrix size for the switch matrix fallback
    pub matrix: Option<MatrixGeometry>,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PollerSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.poller.interval(),
            matrix_interval: config.poller.matrix_interval(),
            reconnect_initial: config.poller.reconnect_initial(),
            reconnect_max: config.poller.reconnect_max(),
            request_timeout: config.device.request_timeout(),
            layer_channel: config.device.layer_channel,
            matrix: config.device.matrix(),
        }
    }
}

pub struct LayerPoller<E: HidEnumerator> {
    locator: DeviceLocator<E>,
    settings: PollerSettings,
    table: LayerTable,
    sink: Box<dyn LayerEventSink>,
    state: PollerState,
    keyboard: Option<ViaKeyboard>,
    source: LayerSource,
    last: Option<LayerState>,
    backoff: Backoff,
    outage_logged: bool,
    read_failing: bool,
    stop: Arc<AtomicBool>,
}

impl<E: HidEnumerator + 'static> LayerPoller<E> {
    pub fn new(
        locator: DeviceLocator<E>,
        settings: PollerSettings,
        table: LayerTable,
        sink: Box<dyn LayerEventSink>,
    ) -> Self {
        let backoff = Backoff::new(settings.reconnect_initial, settings.reconnect_max);
        Self {
            locator,
            settings,
            table,
            sink,
            state: PollerState::Disconnected,
            keyboard: None,
            source: LayerSource::Query,
            last: None,
            backoff,
            outage_logged: false,
            read_failing: false,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Last published layer state
    pub fn last_state(&self) -> Option<LayerState> {
        self.last
    }

    /// Whether layers are being inferred from the switch matrix
    pub fn is_following_matrix(&self) -> bool {
        matches!(self.source, LayerSource::Matrix(_))
    }

    /// Flag that ends `run` when set
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn disconnect(&mut self) {
        // Dropping the keyboard closes the handle
        self.keyboard = None;
        self.source = LayerSource::Query;
        self.last = None;
        self.read_failing = false;
        self.state = PollerState::Disconnected;
    }

    fn poll_interval(&self) -> Duration {
        match self.source {
            LayerSource::Query => self.settings.interval,
            LayerSource::Matrix(_) => self.settings.matrix_interval,
            LayerSource::Unavailable => self.settings.reconnect_max,
        }
    }

    /// Advance the state machine once
    ///
    /// Returns how long to wait before the next step.
    pub fn step(&mut self) -> Duration {
        let Some(keyboard) = self.keyboard.as_mut() else {
            return self.try_connect();
        };

        let result = match &mut self.source {
            LayerSource::Query | LayerSource::Unavailable => keyboard.get_layer_state(),
            LayerSource::Matrix(tracker) => keyboard
                .get_switch_matrix(tracker.keymap().geometry())
                .map(|matrix| tracker.update(matrix)),
        };

        match result {
            Ok(state) => {
                if matches!(self.source, LayerSource::Unavailable) {
                    info!("Keymap now answers the layer query");
                    self.source = LayerSource::Query;
                }
                if self.state == PollerState::Connected {
                    debug!("Polling every {:?}", self.poll_interval());
                }
                self.state = PollerState::Polling;
                self.read_failing = false;
                self.publish_if_needed(state);
                self.poll_interval()
            }
            Err(e) if e.is_disconnect() => {
                warn!("Lost keyboard: {}", e);
                self.disconnect();
                self.backoff.next_delay()
            }
            Err(e) if e.is_unhandled() && matches!(self.source, LayerSource::Query) => {
                self.fall_back()
            }
            Err(e) => {
                // Next tick issues a fresh request
                if self.read_failing {
                    debug!("Layer read still failing: {}", e);
                } else {
                    warn!("Layer read failed: {}", e);
                    self.read_failing = true;
                }
                self.poll_interval()
            }
        }
    }

    fn publish_if_needed(&mut self, state: LayerState) {
        // Always consumed, so a pending resync never outlives a publish
        let resync = self.sink.take_resync();
        if self.last == Some(state) && !resync {
            return;
        }
        let event = self.table.event_for(state);
        if self.last == Some(state) {
            debug!("Republishing {} ({}) after sink reconnect", event, state);
        } else {
            info!("Layer {} ({})", event, state);
        }
        self.sink.publish(event);
        self.last = Some(state);
    }

    /// Switch to the switch matrix after the keymap rejected the layer query
    fn fall_back(&mut self) -> Duration {
        let channel = self.settings.layer_channel;
        let Some(geometry) = self.settings.matrix else {
            warn!(
                "Keymap does not answer the layer query on channel {}; set \
                 device.matrix_rows and device.matrix_cols to follow layers \
                 through the switch matrix",
                channel
            );
            self.source = LayerSource::Unavailable;
            self.read_failing = true;
            return self.poll_interval();
        };
        let Some(keyboard) = self.keyboard.as_mut() else {
            return Duration::ZERO;
        };

        match keyboard.get_keymap(geometry) {
            Ok(keymap) => {
                info!(
                    "Keymap does not answer the layer query on channel {}; following {} layers \
                     through the {} switch matrix",
                    channel,
                    keymap.layer_count(),
                    geometry
                );
                self.source = LayerSource::Matrix(LayerTracker::new(keymap));
                Duration::ZERO
            }
            Err(e) if e.is_disconnect() => {
                warn!("Lost keyboard: {}", e);
                self.disconnect();
                self.backoff.next_delay()
            }
            Err(e) => {
                warn!("Cannot read the keymap: {}; layer changes will not be reported", e);
                self.source = LayerSource::Unavailable;
                self.read_failing = true;
                self.poll_interval()
            }
        }
    }

    fn try_connect(&mut self) -> Duration {
        match self.locator.find_device(AmbiguityPolicy::FirstByPath) {
            Ok(device) => {
                let keyboard = ViaKeyboard::new(device)
                    .with_timeout(self.settings.request_timeout)
                    .with_layer_channel(self.settings.layer_channel);
                info!("Keyboard connected: {}", keyboard.interface().display_name());
                self.keyboard = Some(keyboard);
                self.source = LayerSource::Query;
                self.state = PollerState::Connected;
                self.last = None;
                self.backoff.reset();
                self.outage_logged = false;
                Duration::ZERO
            }
            Err(e) => {
                if self.outage_logged {
                    debug!("Keyboard still unavailable: {}", e);
                } else {
                    warn!("Keyboard unavailable: {}; retrying", e);
                    self.outage_logged = true;
                }
                self.backoff.next_delay()
            }
        }
    }

    fn sleep_unless_stopped(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            std::thread::sleep(remaining.min(STOP_CHECK_INTERVAL));
        }
    }

    /// Poll until the stop flag is set (blocking)
    pub fn run(mut self) {
        info!("Layer poller started for {}", self.locator.identity());
        while !self.stop.load(Ordering::SeqCst) {
            let delay = self.step();
            self.sleep_unless_stopped(delay);
        }
        self.disconnect();
        info!("Layer poller stopped");
    }

    /// Run on a dedicated thread
    pub fn spawn(self) -> std::io::Result<PollerHandle> {
        let stop = self.stop_flag();
        let thread = std::thread::Builder::new()
            .name("layer-poller".into())
            .spawn(move || self.run())?;
        Ok(PollerHandle { stop, thread })
    }
}

/// Running poller thread
pub struct PollerHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl PollerHandle {
    /// Request a stop and wait for the thread (blocking)
    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.thread.join().is_err() {
            warn!("Layer poller thread panicked");
        }
    }
}
