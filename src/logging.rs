//! Global logger
//!
//! The kernel has no console of its own; whoever owns the machine (boot
//! code, or a test harness) registers a sink once and every `log` record
//! is formatted through it.

use alloc::format;
use alloc::string::String;

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Once;

static SINK: Once<fn(&str)> = Once::new();

/// Print msg with color
fn print_in_color(line: String, color_code: u8) {
    if let Some(sink) = SINK.get() {
        sink(&format!("\u{1B}[{}m{}\u{1B}[0m", color_code, line));
    }
}

/// a simple logger
struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 34,  // Blue
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        print_in_color(
            format!(
                "[{:>5}][{}] {}\n",
                record.level(),
                record.target(),
                record.args()
            ),
            color,
        );
    }
    fn flush(&self) {}
}

/// initiate logger, routing output through `sink`
pub fn init(sink: fn(&str)) {
    static LOGGER: SimpleLogger = SimpleLogger;
    SINK.call_once(|| sink);
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(match option_env!("LOG") {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Error,
    });
}
