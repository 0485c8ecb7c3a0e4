//! Progress tracking for migration runs.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Progress update information.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current phase of the run.
    pub phase: MigrationPhase,

    /// Issue just handled, e.g. `#12`.
    pub current_item: Option<String>,

    /// Entries completed in the current phase.
    pub completed: u64,

    /// Total entries in the current phase.
    pub total: u64,

    /// Optional message.
    pub message: Option<String>,
}

/// Phases of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MigrationPhase {
    Initializing = 0,
    FetchingIssues = 1,
    Verifying = 2,
    MigratingIssues = 3,
    Complete = 4,
}

impl MigrationPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::FetchingIssues,
            2 => Self::Verifying,
            3 => Self::MigratingIssues,
            _ => Self::Complete,
        }
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Initializing => "Initializing",
            Self::FetchingIssues => "Fetching source issues",
            Self::Verifying => "Verifying interrupted imports",
            Self::MigratingIssues => "Migrating issues",
            Self::Complete => "Complete",
        })
    }
}

/// Progress tracker shared between the driver and whoever displays it.
pub struct MigrationProgress {
    phase: AtomicU8,
    completed: AtomicU64,
    total: AtomicU64,
    callback: Option<Arc<ProgressCallback>>,
}

impl MigrationProgress {
    /// Create a tracker without a callback.
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(MigrationPhase::Initializing as u8),
            completed: AtomicU64::new(0),
            total: AtomicU64::new(0),
            callback: None,
        }
    }

    /// Create a tracker that reports every update to `callback`.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
            ..Self::new()
        }
    }

    /// Enter a phase with `total` units of work.
    pub fn set_phase(&self, phase: MigrationPhase, total: u64) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.notify(None, None);
    }

    /// Record one more finished unit.
    pub fn increment(&self, item: Option<&str>) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.notify(item.map(str::to_string), None);
    }

    /// Report a free-form message.
    pub fn message(&self, msg: &str) {
        self.notify(None, Some(msg.to_string()));
    }

    /// Completed units in the current phase.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Current progress percentage.
    pub fn percentage(&self) -> f64 {
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        (self.completed() as f64 / total as f64) * 100.0
    }

    /// Current phase.
    pub fn current_phase(&self) -> MigrationPhase {
        MigrationPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn notify(&self, current_item: Option<String>, message: Option<String>) {
        if let Some(callback) = &self.callback {
            callback(ProgressUpdate {
                phase: self.current_phase(),
                current_item,
                completed: self.completed(),
                total: self.total.load(Ordering::SeqCst),
                message,
            });
        }
    }
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Console progress bar on stderr.
pub struct ConsoleProgressReporter {
    progress_bar: ProgressBar,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter.
    pub fn new() -> Self {
        let progress_bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        progress_bar.set_style(style);

        Self { progress_bar }
    }

    /// Create a progress callback that drives this bar.
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.progress_bar.clone();
        Box::new(move |update: ProgressUpdate| {
            pb.set_length(update.total);
            pb.set_position(update.completed);

            let mut msg = update.phase.to_string();
            if let Some(item) = &update.current_item {
                msg = format!("{msg}: {item}");
            }
            if let Some(message) = &update.message {
                msg = format!("{msg} - {message}");
            }
            pb.set_message(msg);
        })
    }

    /// Finish the progress bar.
    pub fn finish(&self, message: &str) {
        self.progress_bar.finish_with_message(message.to_string());
    }
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_progress_tracker() {
        let progress = MigrationProgress::new();
        assert_eq!(progress.current_phase(), MigrationPhase::Initializing);

        progress.set_phase(MigrationPhase::MigratingIssues, 4);
        assert_eq!(progress.current_phase(), MigrationPhase::MigratingIssues);
        assert_eq!(progress.percentage(), 0.0);

        progress.increment(Some("#1"));
        assert!((progress.percentage() - 25.0).abs() < 0.01);

        for _ in 0..3 {
            progress.increment(None);
        }
        assert_eq!(progress.completed(), 4);
        assert!((progress.percentage() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_progress_with_callback() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();

        let progress = MigrationProgress::with_callback(Box::new(move |update| {
            sink.lock().push(update);
        }));
        progress.set_phase(MigrationPhase::MigratingIssues, 2);
        progress.increment(Some("#1"));
        progress.increment(Some("#2"));

        let updates = updates.lock();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[2].completed, 2);
        assert_eq!(updates[2].current_item.as_deref(), Some("#2"));
    }

    #[test]
    fn test_message_keeps_counts() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();

        let progress = MigrationProgress::with_callback(Box::new(move |update| {
            sink.lock().push(update);
        }));
        progress.set_phase(MigrationPhase::MigratingIssues, 2);
        progress.increment(Some("#1"));
        progress.message("#1 unverified");

        let updates = updates.lock();
        let last = updates.last().unwrap();
        assert_eq!(last.message.as_deref(), Some("#1 unverified"));
        assert_eq!(last.completed, 1);
        assert!(last.current_item.is_none());
    }
}
