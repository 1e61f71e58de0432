//! Stand-in layer indicator for the session bus
//!
//! Serves `SetLayer`/`GetLayer` under the indicator's well-known name so the
//! pipeline can run and be debugged without the shell widget. Updates are
//! logged, and so is a displayed layer that has not been refreshed within the
//! staleness window.

#[cfg(feature = "dbus")]
pub mod daemon;
#[cfg(feature = "dbus")]
pub mod dbus;
pub mod state;

pub use state::IndicatorState;
