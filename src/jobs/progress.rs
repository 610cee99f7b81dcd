//! Per-task progress events.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::mpsc::UnboundedSender;

/// Identity of one unit of work: an item inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub collection_id: String,
    pub item_id: String,
}

impl TaskKey {
    pub fn new(collection_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            item_id: item_id.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection_id, self.item_id)
    }
}

/// Lifecycle of a task as seen by progress consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    /// Downloading; `percent` is a fraction in `[0, 1]` when known
    Fetching { percent: Option<f32> },
    PostProcessing,
    Done,
    Failed { reason: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

/// One progress event.
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub key: TaskKey,
    pub state: JobState,
}

/// Handle a running task uses to publish its progress.
///
/// Cheap to clone. Fractions are clamped to `[0, 1]` and never go backwards.
/// Events are dropped silently when nobody listens.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    key: TaskKey,
    events: Option<UnboundedSender<JobProgress>>,
    /// Highest fraction reported so far, as `f32` bits
    high_water: Arc<AtomicU32>,
}

impl ProgressReporter {
    pub(crate) fn new(key: TaskKey, events: Option<UnboundedSender<JobProgress>>) -> Self {
        Self {
            key,
            events,
            high_water: Arc::new(AtomicU32::new(0f32.to_bits())),
        }
    }

    /// Reporter that goes nowhere.
    pub fn detached(key: TaskKey) -> Self {
        Self::new(key, None)
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// Report download progress; `None` when the total is unknown.
    pub fn fetching(&self, fraction: Option<f32>) {
        let percent = fraction.map(|f| self.raise(f));
        self.emit(JobState::Fetching { percent });
    }

    pub fn post_processing(&self) {
        self.emit(JobState::PostProcessing);
    }

    pub(crate) fn queued(&self) {
        self.emit(JobState::Queued);
    }

    pub(crate) fn done(&self) {
        self.emit(JobState::Done);
    }

    pub(crate) fn failed(&self, reason: impl Into<String>) {
        self.emit(JobState::Failed {
            reason: reason.into(),
        });
    }

    /// Record `fraction` and return the value to publish.
    fn raise(&self, fraction: f32) -> f32 {
        // Also maps NaN and -0.0 to 0.0
        let fraction = if fraction > 0.0 { fraction.min(1.0) } else { 0.0 };
        self.high_water.fetch_max_f32(fraction).max(fraction)
    }

    fn emit(&self, state: JobState) {
        if let Some(tx) = &self.events {
            let _ = tx.send(JobProgress {
                key: self.key.clone(),
                state,
            });
        }
    }
}

/// `fetch_max` for an `f32` stored as bits. Only non-negative values are
/// stored, whose bit patterns order like the floats themselves.
trait AtomicF32Max {
    fn fetch_max_f32(&self, value: f32) -> f32;
}

impl AtomicF32Max for AtomicU32 {
    fn fetch_max_f32(&self, value: f32) -> f32 {
        f32::from_bits(self.fetch_max(value.to_bits(), Ordering::SeqCst))
    }
}
