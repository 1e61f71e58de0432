//! `list`: show VIA keyboards, or every HID interface with `--all`.

use std::collections::BTreeMap;

use via_keyboard::ViaKeyboard;
use via_transport::protocol::{VIA_USAGE, VIA_USAGE_PAGE};
use via_transport::{DeviceIdentity, DeviceLocator, HidInterfaceInfo};

use qmk_layer_bridge::Config;

use super::CommandResult;

pub fn run(config: &Config, all: bool) -> CommandResult {
    if all {
        list_all(config.device.identity)
    } else {
        list_via(config)
    }
}

fn list_via(config: &Config) -> CommandResult {
    let mut locator = DeviceLocator::system(config.device.identity)?;
    println!("Scanning for VIA keyboards matching {}...", locator.identity());
    let candidates = locator.list_candidates()?;

    if candidates.is_empty() {
        println!("\nNo VIA-capable keyboards found.");
        println!("\nMake sure:");
        println!("  1. The firmware has RAW_ENABLE and VIA_ENABLE");
        println!("  2. The keyboard is connected");
        println!("  3. You can access /dev/hidraw* (check udev rules)");
        println!("\nTip: run `list --all` to see every HID interface");
        return Ok(());
    }

    println!("\nFound {} VIA-capable keyboard(s)", candidates.len());
    for (i, iface) in candidates.iter().enumerate() {
        println!("\nKeyboard #{}:\n", i + 1);
        let device = match locator.open(iface) {
            Ok(device) => device,
            Err(e) => {
                println!("Failed to open {}: {}", iface.path, e);
                continue;
            }
        };
        let mut keyboard = ViaKeyboard::new(device)
            .with_timeout(config.device.request_timeout())
            .with_layer_channel(config.device.layer_channel);
        match keyboard.query_info() {
            Ok(info) => println!("{info}"),
            Err(e) => println!("Query failed: {e}"),
        }
    }
    Ok(())
}

fn is_via(iface: &HidInterfaceInfo) -> bool {
    iface.usage_page == VIA_USAGE_PAGE && iface.usage == VIA_USAGE
}

fn list_all(identity: DeviceIdentity) -> CommandResult {
    let mut locator = DeviceLocator::system(identity)?;
    let interfaces = locator.enumerate_all()?;
    if interfaces.is_empty() {
        println!("No HID devices found!");
        return Ok(());
    }
    println!("Found {} HID interface(s)\n", interfaces.len());

    let mut grouped: BTreeMap<(u16, u16), Vec<&HidInterfaceInfo>> = BTreeMap::new();
    for iface in &interfaces {
        grouped
            .entry((iface.vendor_id, iface.product_id))
            .or_default()
            .push(iface);
    }

    for ((vid, pid), ifaces) in grouped {
        println!("{}", ifaces[0].display_name());
        println!("  USB ID: {vid:04X}:{pid:04X}");
        println!("  Interfaces: {}", ifaces.len());
        for (i, iface) in ifaces.iter().enumerate() {
            let marker = if is_via(iface) { "  [VIA]" } else { "" };
            println!(
                "    [{}] Interface {}, Usage Page 0x{:04X}, Usage 0x{:02X}{}",
                i + 1,
                iface.interface_number,
                iface.usage_page,
                iface.usage,
                marker
            );
            println!("        Path: {}", iface.path);
        }
        println!();
    }
    Ok(())
}
