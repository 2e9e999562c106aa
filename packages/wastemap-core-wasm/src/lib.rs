use wasm_bindgen::prelude::*;

// Console backend for the `log` facade
pub mod console;
// Map configuration parsed from the host
pub mod config;
// The map SDK seam and its value types
pub mod sdk;
// Address geocoding with per-batch dedup and a bounded cache
pub mod geocode;
// Region ring validation
pub mod geometry;
// Complaint records and pin grouping
pub mod pins;
// Marker icons and info-window markup
pub mod markers;
// Region service payloads
pub mod region;
// Map instance lifecycle
pub mod session;
pub mod pin_manager;
pub mod polygon_manager;
pub mod tooltip;
pub mod map_view;
// Browser adapters and the exported handle
pub mod bindings;

#[cfg(test)]
mod testing;

pub use bindings::WasteMap;
pub use config::MapConfig;
pub use map_view::{MapView, OutboundEvent};

// Enable better panic messages in console during development
#[cfg(feature = "console_error_panic_hook")]
pub use console_error_panic_hook::set_once as set_panic_hook;

use std::sync::Once;
static INIT: Once = Once::new();

#[wasm_bindgen(start)]
pub fn start() {
    INIT.call_once(|| {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        // Adjusted per map from its config.
        console::init(log::LevelFilter::Info);
        log::info!("wastemap core initialized");
    });
}

#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
