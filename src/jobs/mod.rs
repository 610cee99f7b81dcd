//! Bounded-concurrency job engine.
//!
//! Runs queued [`Task`]s through a [`JobHandler`] with at most `N` tasks
//! active at once. Every task ends in exactly one terminal progress event
//! (`Done` or `Failed`), and a failing or panicking task never affects its
//! siblings.
//!
//! # Usage
//!
//! ```ignore
//! let engine = JobEngine::new(handler, 3).with_progress(tx);
//! engine.submit(tasks);
//! let report = engine.run_to_completion().await;
//! for failure in &report.failed {
//!     eprintln!("{}: {}", failure.key, failure.reason);
//! }
//! ```

mod progress;

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;

use crate::error::Result;

pub use progress::{JobProgress, JobState, ProgressReporter, TaskKey};

/// One unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub key: TaskKey,
    /// Folder the finished artifact goes to
    pub output_dir: PathBuf,
}

impl Task {
    pub fn new(
        collection_id: impl Into<String>,
        item_id: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key: TaskKey::new(collection_id, item_id),
            output_dir: output_dir.into(),
        }
    }
}

/// The per-task work. The engine knows nothing else about it.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn run(&self, task: Task, progress: ProgressReporter) -> Result<()>;
}

/// A task that ended in failure.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub key: TaskKey,
    pub reason: String,
}

/// Outcome of one [`JobEngine::run_to_completion`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub completed: usize,
    pub failed: Vec<JobFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed.len()
    }
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Task>,
    /// Keys queued or running; a key is never scheduled twice at once
    known: HashSet<TaskKey>,
}

/// Executes tasks with bounded parallelism.
pub struct JobEngine<H: JobHandler> {
    handler: Arc<H>,
    slots: Arc<Semaphore>,
    max_parallel: usize,
    queue: Mutex<Queue>,
    accepting: AtomicBool,
    events: Option<UnboundedSender<JobProgress>>,
    /// Serializes concurrent `run_to_completion` callers
    drain: tokio::sync::Mutex<()>,
}

impl<H: JobHandler> JobEngine<H> {
    /// Engine running at most `max_parallel` tasks at once (minimum 1).
    pub fn new(handler: Arc<H>, max_parallel: usize) -> Self {
        let max_parallel = max_parallel.max(1);
        Self {
            handler,
            slots: Arc::new(Semaphore::new(max_parallel)),
            max_parallel,
            queue: Mutex::new(Queue::default()),
            accepting: AtomicBool::new(true),
            events: None,
            drain: tokio::sync::Mutex::new(()),
        }
    }

    /// Publish progress events to `tx`.
    pub fn with_progress(mut self, tx: UnboundedSender<JobProgress>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Number of tasks waiting to start.
    pub fn pending(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// Queue `tasks`, skipping keys already queued or running.
    ///
    /// Returns how many were accepted. Allowed while a batch is draining.
    pub fn submit(&self, tasks: impl IntoIterator<Item = Task>) -> usize {
        if !self.accepting.load(Ordering::SeqCst) {
            tracing::warn!(target: "syncy::jobs", "Engine is shutting down, submission refused");
            return 0;
        }

        let mut accepted = Vec::new();
        {
            let mut queue = self.queue.lock();
            for task in tasks {
                if !queue.known.insert(task.key.clone()) {
                    tracing::debug!(target: "syncy::jobs", key = %task.key, "Skipping duplicate task");
                    continue;
                }
                accepted.push(task.key.clone());
                queue.pending.push_back(task);
            }
        }

        for key in &accepted {
            self.reporter(key.clone()).queued();
        }
        tracing::debug!(target: "syncy::jobs", accepted = accepted.len(), "Tasks submitted");
        accepted.len()
    }

    /// Refuse further submissions. Queued and running work still drains.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Drop queued tasks that have not started. Each gets a `Failed` event.
    pub fn cancel_pending(&self) -> usize {
        let dropped: Vec<Task> = {
            let mut queue = self.queue.lock();
            let dropped: Vec<Task> = queue.pending.drain(..).collect();
            for task in &dropped {
                queue.known.remove(&task.key);
            }
            dropped
        };

        for task in &dropped {
            self.reporter(task.key.clone()).failed("cancelled before start");
        }
        if !dropped.is_empty() {
            tracing::info!(target: "syncy::jobs", cancelled = dropped.len(), "Cancelled pending tasks");
        }
        dropped.len()
    }

    /// Run until the queue, including anything submitted meanwhile, is empty.
    ///
    /// Never fails: task errors and panics are collected in the report.
    pub async fn run_to_completion(&self) -> BatchReport {
        let _drain = self.drain.lock().await;
        let mut report = BatchReport::default();
        let mut running = JoinSet::new();

        loop {
            while let Some(task) = self.next_task() {
                let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await else {
                    // The semaphore is never closed
                    break;
                };

                let handler = Arc::clone(&self.handler);
                let reporter = self.reporter(task.key.clone());
                running.spawn(async move {
                    let _permit = permit;
                    let key = task.key.clone();
                    tracing::debug!(target: "syncy::jobs", key = %key, "Task started");

                    let outcome = AssertUnwindSafe(handler.run(task, reporter.clone()))
                        .catch_unwind()
                        .await;
                    let outcome = match outcome {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(panic) => Err(format!("task panicked: {}", panic_message(&*panic))),
                    };

                    match &outcome {
                        Ok(()) => reporter.done(),
                        Err(reason) => reporter.failed(reason.clone()),
                    }
                    (key, outcome)
                });

                while let Some(joined) = running.try_join_next() {
                    self.record(joined, &mut report);
                }
            }

            match running.join_next().await {
                Some(joined) => self.record(joined, &mut report),
                None if self.pending() > 0 => continue,
                None => break,
            }
        }

        tracing::info!(
            target: "syncy::jobs",
            completed = report.completed,
            failed = report.failed.len(),
            "Batch finished"
        );
        report
    }

    fn next_task(&self) -> Option<Task> {
        self.queue.lock().pending.pop_front()
    }

    fn record(
        &self,
        joined: std::result::Result<(TaskKey, std::result::Result<(), String>), tokio::task::JoinError>,
        report: &mut BatchReport,
    ) {
        match joined {
            Ok((key, outcome)) => {
                self.queue.lock().known.remove(&key);
                match outcome {
                    Ok(()) => {
                        tracing::debug!(target: "syncy::jobs", key = %key, "Task done");
                        report.completed += 1;
                    }
                    Err(reason) => {
                        tracing::warn!(target: "syncy::jobs", key = %key, reason = %reason, "Task failed");
                        report.failed.push(JobFailure { key, reason });
                    }
                }
            }
            // Panics are caught inside the task, so only runtime shutdown lands here
            Err(e) => tracing::error!(target: "syncy::jobs", error = %e, "Task aborted"),
        }
    }

    fn reporter(&self, key: TaskKey) -> ProgressReporter {
        ProgressReporter::new(key, self.events.clone())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Handler that sleeps, tracks concurrency, and fails or panics on request.
    #[derive(Default)]
    struct TestHandler {
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
        delay_ms: u64,
        fail: Vec<String>,
        panic: Vec<String>,
    }

    impl TestHandler {
        fn sleeping(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl JobHandler for TestHandler {
        async fn run(&self, task: Task, progress: ProgressReporter) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            progress.fetching(Some(0.5));
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            progress.post_processing();
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.panic.contains(&task.key.item_id) {
                panic!("boom in {}", task.key.item_id);
            }
            if self.fail.contains(&task.key.item_id) {
                return Err(Error::network("remote went away"));
            }
            Ok(())
        }
    }

    fn tasks(n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| Task::new("svc:playlist:X", format!("svc:track:{i}"), "/tmp"))
            .collect()
    }

    fn terminal_states(rx: &mut mpsc::UnboundedReceiver<JobProgress>) -> HashMap<TaskKey, Vec<JobState>> {
        let mut by_key: HashMap<TaskKey, Vec<JobState>> = HashMap::new();
        while let Ok(event) = rx.try_recv() {
            by_key.entry(event.key).or_default().push(event.state);
        }
        by_key
    }

    #[tokio::test]
    async fn test_bounded_parallelism() {
        let handler = Arc::new(TestHandler::sleeping(20));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = JobEngine::new(Arc::clone(&handler), 3).with_progress(tx);

        assert_eq!(engine.submit(tasks(10)), 10);
        let report = engine.run_to_completion().await;

        assert_eq!(report.completed, 10);
        assert!(report.failed.is_empty());
        assert!(handler.max_active.load(Ordering::SeqCst) <= 3);
        assert!(handler.max_active.load(Ordering::SeqCst) >= 2);

        let events = terminal_states(&mut rx);
        assert_eq!(events.len(), 10);
        for states in events.values() {
            assert_eq!(states.first(), Some(&JobState::Queued));
            assert_eq!(states.last(), Some(&JobState::Done));
            assert_eq!(states.iter().filter(|s| s.is_terminal()).count(), 1);
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let handler = Arc::new(TestHandler {
            delay_ms: 5,
            fail: vec!["svc:track:3".to_string()],
            panic: vec!["svc:track:7".to_string()],
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = JobEngine::new(Arc::clone(&handler), 3).with_progress(tx);

        engine.submit(tasks(10));
        let report = engine.run_to_completion().await;

        assert_eq!(report.completed, 8);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.total(), 10);

        let panicked = report
            .failed
            .iter()
            .find(|f| f.key.item_id == "svc:track:7")
            .unwrap();
        assert!(panicked.reason.contains("panicked"));
        assert!(panicked.reason.contains("boom"));

        let events = terminal_states(&mut rx);
        assert!(matches!(
            events[&TaskKey::new("svc:playlist:X", "svc:track:3")].last(),
            Some(JobState::Failed { .. })
        ));
        assert!(events.values().all(|s| s.last().is_some_and(JobState::is_terminal)));
    }

    #[tokio::test]
    async fn test_submission_while_draining_is_picked_up() {
        let handler = Arc::new(TestHandler::sleeping(30));
        let engine = Arc::new(JobEngine::new(Arc::clone(&handler), 1));
        engine.submit(tasks(3));

        let late = Arc::clone(&engine);
        let submitter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            late.submit((10..12).map(|i| Task::new("svc:playlist:X", format!("svc:track:{i}"), "/tmp")))
        });

        let report = engine.run_to_completion().await;
        assert_eq!(submitter.await.unwrap(), 2);
        assert_eq!(report.completed, 5);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let handler = Arc::new(TestHandler::sleeping(1));
        let engine = JobEngine::new(Arc::clone(&handler), 2);
        engine.submit(tasks(4));

        assert_eq!(engine.run_to_completion().await.completed, 4);
        assert_eq!(engine.run_to_completion().await, BatchReport::default());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_skipped() {
        let handler = Arc::new(TestHandler::sleeping(1));
        let engine = JobEngine::new(Arc::clone(&handler), 2);

        assert_eq!(engine.submit(tasks(2)), 2);
        assert_eq!(engine.submit(tasks(3)), 1);
        assert_eq!(engine.run_to_completion().await.completed, 3);

        // Finished keys may be submitted again
        assert_eq!(engine.submit(tasks(1)), 1);
    }

    #[tokio::test]
    async fn test_stop_accepting_and_cancel() {
        let handler = Arc::new(TestHandler::sleeping(1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = JobEngine::new(Arc::clone(&handler), 2).with_progress(tx);

        engine.submit(tasks(3));
        assert_eq!(engine.cancel_pending(), 3);
        assert_eq!(engine.pending(), 0);

        engine.stop_accepting();
        assert!(!engine.is_accepting());
        assert_eq!(engine.submit(tasks(2)), 0);

        assert_eq!(engine.run_to_completion().await, BatchReport::default());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        let events = terminal_states(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(events.values().all(|s| matches!(s.last(), Some(JobState::Failed { .. }))));
    }

    #[test]
    fn test_zero_parallelism_is_raised_to_one() {
        let engine = JobEngine::new(Arc::new(TestHandler::default()), 0);
        assert_eq!(engine.max_parallel(), 1);
    }
}
