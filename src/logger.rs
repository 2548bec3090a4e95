//! Diagnostics sink for the simulator.
//!
//! Routes `log` records to stderr, keeping stdout free for simulation
//! output. The trace level carries the per-access stream, so those records
//! get a running sequence number and their origin module; with
//! `--log-accesses` that turns the stderr output into a numbered
//! translation log that stays greppable over long traces. Everything else
//! is prefixed with its level only.

use std::sync::atomic::{AtomicU64, Ordering};

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

struct StderrLogger {
    /// Sequence number shared by all trace records.
    trace_seq: AtomicU64,
}

static LOGGER: StderrLogger = StderrLogger {
    trace_seq: AtomicU64::new(0),
};

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        match record.level() {
            Level::Trace => {
                let seq = self.trace_seq.fetch_add(1, Ordering::Relaxed);
                eprintln!("{seq:>8}  {}: {}", record.target(), record.args());
            }
            level => eprintln!("[{level}] {}", record.args()),
        }
    }

    fn flush(&self) {}
}

/// Install the logger and cap it at `max_level`.
pub fn init(max_level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(max_level);
    Ok(())
}
