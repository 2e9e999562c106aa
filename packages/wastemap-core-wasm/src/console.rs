// Routes the `log` facade to the browser console so every module can use
// `log::info!` and friends. Off the wasm target the same records go to stderr.

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::Once;

static INSTALL: Once = Once::new();
static LOGGER: ConsoleLogger = ConsoleLogger;

pub struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("[{}] {}", record.target(), record.args());
        write_line(record.level(), &line);
    }

    fn flush(&self) {}
}

#[cfg(target_arch = "wasm32")]
fn write_line(level: Level, line: &str) {
    use wasm_bindgen::JsValue;
    use web_sys::console;

    let value = JsValue::from_str(line);
    match level {
        Level::Error => console::error_1(&value),
        Level::Warn => console::warn_1(&value),
        Level::Info => console::info_1(&value),
        Level::Debug | Level::Trace => console::debug_1(&value),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn write_line(level: Level, line: &str) {
    eprintln!("{:<5} {}", level, line);
}

/// Installs the console logger once; later calls only adjust the level.
pub fn init(level: LevelFilter) {
    INSTALL.call_once(|| {
        // Another logger may already be registered by the host (tests, native tools).
        let _ = log::set_logger(&LOGGER);
    });
    log::set_max_level(level);
}

/// Parses a level name from configuration, defaulting to `Info`.
pub fn parse_level(name: &str) -> LevelFilter {
    name.trim().parse().unwrap_or(LevelFilter::Info)
}
