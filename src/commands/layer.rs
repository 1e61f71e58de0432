//! `layer`: read the layer state once.

use qmk_layer_bridge::Config;

use super::{open_keyboard, CommandResult};

pub fn run(config: &Config) -> CommandResult {
    let table = config.layer_table()?;
    let mut keyboard = open_keyboard(config)?;
    let state = match keyboard.get_layer_state() {
        Ok(state) => state,
        Err(e) if e.is_unhandled() => anyhow::bail!(
            "{e}: the keymap does not answer the layer query on channel {}; \
             `poll` can follow layers through the switch matrix once \
             device.matrix_rows and device.matrix_cols are set",
            config.device.layer_channel
        ),
        Err(e) => return Err(e.into()),
    };
    let event = table.event_for(state);

    println!("Active layer:    {}", state.active_layer);
    println!("Default layer:   {}", state.default_layer);
    println!(
        "Effective layer: {} -> {}",
        state.effective_layer(),
        event
    );
    Ok(())
}
