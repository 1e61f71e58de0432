//! Integration tests for keyboard device queries.
//!
//! These tests require a real VIA keyboard to be connected.
//! Run with: cargo test -p via-keyboard --test device_queries -- --ignored --nocapture

use std::time::{Duration, Instant};

use via_keyboard::ViaKeyboard;
use via_transport::{AmbiguityPolicy, DeviceIdentity, DeviceLocator};

/// Open the first VIA keyboard, the way the poller's connect step does
fn open_keyboard() -> ViaKeyboard {
    let mut locator = DeviceLocator::system(DeviceIdentity::default())
        .expect("hidapi failed to initialize");
    let device = locator
        .find_device(AmbiguityPolicy::FirstByPath)
        .expect("No VIA keyboard found - plug in a supported device");
    ViaKeyboard::new(device)
}

/// All informational queries used by `list` must complete promptly
#[test]
#[ignore] // requires hardware
fn info_queries_resolve() {
    let mut kb = open_keyboard();

    let start = Instant::now();
    let info = kb.query_info().expect("query_info failed");
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "info queries took {:?}",
        start.elapsed()
    );

    assert!(
        info.protocol_version.is_some(),
        "every VIA firmware answers GET_PROTOCOL_VERSION"
    );
    if let Some(layers) = info.layer_count {
        assert!(layers > 0, "layer count should be non-zero");
    }
    eprintln!("{info}");
}

/// Layer state must be readable repeatedly at the poll rate
#[test]
#[ignore] // requires hardware and a keymap answering layer queries
fn layer_state_polls() {
    let mut kb = open_keyboard();

    for _ in 0..10 {
        let state = kb.get_layer_state().expect("layer query failed");
        eprintln!("Layer state: {state} (effective {})", state.effective_layer());
        std::thread::sleep(Duration::from_millis(100));
    }
}
