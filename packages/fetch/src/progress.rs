//! Progress observer for long-running fetches.
//!
//! The fetch engine reports what it is doing (records fetched, tiles and
//! chunks completed) through [`ProgressCallback`] and never renders
//! anything itself. The CLI plugs in `indicatif` bars; tests and
//! non-interactive runs use [`NullProgress`] or [`LogProgress`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Observer for progress events.
///
/// Implementations must be `Send + Sync` so one observer can be shared
/// behind an `Arc` by every stage of a run.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work (enables percentage/ETA).
    fn set_total(&self, total: u64);

    /// Set the current position (absolute, not delta).
    fn set_position(&self, pos: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);

    /// Mark progress as complete and remove the progress indicator.
    fn finish_and_clear(&self);
}

/// Ignores every progress event.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

/// Reports progress through `log::info!`, at most once every `every`
/// units, for runs without a terminal.
pub struct LogProgress {
    label: String,
    every: u64,
    position: AtomicU64,
    total: AtomicU64,
    last_logged: AtomicU64,
}

impl LogProgress {
    #[must_use]
    pub fn new(label: &str, every: u64) -> Arc<dyn ProgressCallback> {
        Arc::new(Self {
            label: label.to_string(),
            every: every.max(1),
            position: AtomicU64::new(0),
            total: AtomicU64::new(0),
            last_logged: AtomicU64::new(0),
        })
    }

    fn report(&self, pos: u64) {
        let last = self.last_logged.load(Ordering::Relaxed);
        if pos < last.saturating_add(self.every) {
            return;
        }
        self.last_logged.store(pos, Ordering::Relaxed);
        match self.total.load(Ordering::Relaxed) {
            0 => log::info!("{}: {pos}", self.label),
            total => log::info!("{}: {pos} / {total}", self.label),
        }
    }
}

impl ProgressCallback for LogProgress {
    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn set_position(&self, pos: u64) {
        self.position.store(pos, Ordering::Relaxed);
        self.report(pos);
    }

    fn inc(&self, delta: u64) {
        let pos = self.position.fetch_add(delta, Ordering::Relaxed) + delta;
        self.report(pos);
    }

    fn set_message(&self, msg: String) {
        log::info!("{}: {msg}", self.label);
    }

    fn finish(&self, msg: String) {
        log::info!("{}: {msg}", self.label);
    }

    fn finish_and_clear(&self) {}
}

/// Records every event, for assertions in tests.
#[cfg(any(test, feature = "testing"))]
#[derive(Default)]
pub struct RecordingProgress {
    /// Last value passed to `set_total`.
    pub total: AtomicU64,
    /// Sum of all `inc` deltas plus the last `set_position`.
    pub position: AtomicU64,
    /// Every message passed to `set_message` and `finish`.
    pub messages: std::sync::Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "testing"))]
impl ProgressCallback for RecordingProgress {
    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn set_position(&self, pos: u64) {
        self.position.store(pos, Ordering::Relaxed);
    }

    fn inc(&self, delta: u64) {
        self.position.fetch_add(delta, Ordering::Relaxed);
    }

    fn set_message(&self, msg: String) {
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(msg);
    }

    fn finish(&self, msg: String) {
        self.set_message(msg);
    }

    fn finish_and_clear(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_progress_accumulates() {
        let progress = RecordingProgress::default();
        progress.set_total(10);
        progress.inc(3);
        progress.inc(4);
        progress.finish("done".to_string());
        assert_eq!(progress.total.load(Ordering::Relaxed), 10);
        assert_eq!(progress.position.load(Ordering::Relaxed), 7);
        assert_eq!(*progress.messages.lock().unwrap(), vec!["done".to_string()]);
    }
}
