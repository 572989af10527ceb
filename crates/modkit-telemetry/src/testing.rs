//! Test helpers: a logger whose only sink keeps records in memory, and an
//! in-memory writer for sinks that format text.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::level::Level;
use crate::logger::Logger;
use crate::record::LogRecord;
use crate::sink::{Sink, SinkKind};

/// Held by tests that touch process-wide state: the panic hook, the stream
/// redirect, the global dispatcher or the global logger.
pub(crate) fn process_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records collected by a [`CaptureSink`].
#[derive(Clone, Default)]
pub(crate) struct Captured(Arc<Mutex<Vec<LogRecord>>>);

impl Captured {
    /// Drain everything captured so far.
    pub(crate) fn take(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

struct CaptureSink {
    min_level: Level,
    records: Captured,
}

impl Sink for CaptureSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Custom("capture".to_string())
    }

    fn min_level(&self) -> Level {
        self.min_level
    }

    fn emit(&self, record: &LogRecord) -> io::Result<()> {
        self.records
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// A fresh logger with one capturing sink at `min_level`.
pub(crate) fn capture(min_level: Level) -> (Logger, Captured) {
    let logger = Logger::new();
    let records = attach(&logger, min_level);
    (logger, records)
}

/// Add a capturing sink at `min_level` to an existing logger.
pub(crate) fn attach(logger: &Logger, min_level: Level) -> Captured {
    let records = Captured::default();
    logger.add_sink(Box::new(CaptureSink {
        min_level,
        records: records.clone(),
    }));
    records
}

/// Writer whose bytes the test can read back.
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn text(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner).clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
