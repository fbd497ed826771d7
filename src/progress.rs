//! Progress reporting: the reporter interface and the shared completion counter

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};

use crate::types::Event;

/// Consumer of progress [`Event`]s
///
/// Called from transfer tasks; implementations must not block.
pub trait ProgressReporter: Send + Sync {
    /// Handle one event
    fn report(&self, event: Event);
}

/// Forward events to every subscriber of a broadcast channel
impl ProgressReporter for broadcast::Sender<Event> {
    fn report(&self, event: Event) {
        // No subscribers is fine
        self.send(event).ok();
    }
}

/// Discards all events
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: Event) {}
}

/// Completed-file counter for one batch
///
/// Lives for the whole thread download, so the count never goes backwards
/// across retries. Incrementing and reporting happen under one lock, which
/// keeps emitted counts strictly increasing.
pub struct ProgressCounter {
    thread: String,
    total: usize,
    completed: Mutex<usize>,
    reporter: Arc<dyn ProgressReporter>,
}

impl ProgressCounter {
    /// Start counting for a batch of `total` files
    pub fn new(thread: impl Into<String>, total: usize, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            thread: thread.into(),
            total,
            completed: Mutex::new(0),
            reporter,
        }
    }

    /// Count one finalized file and emit its progress event
    ///
    /// Returns the new completed count.
    pub async fn complete(&self, path: PathBuf) -> usize {
        let mut completed = self.completed.lock().await;
        *completed += 1;
        self.reporter.report(Event::FileCompleted {
            thread: self.thread.clone(),
            completed: *completed,
            total: self.total,
            path,
        });
        *completed
    }

    /// Files completed so far
    pub async fn completed(&self) -> usize {
        *self.completed.lock().await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_emits_running_count() {
        let (tx, mut rx) = broadcast::channel(16);
        let counter = ProgressCounter::new("g/1", 2, Arc::new(tx));

        assert_eq!(counter.complete(PathBuf::from("a.jpg")).await, 1);
        assert_eq!(counter.complete(PathBuf::from("b.jpg")).await, 2);

        match rx.recv().await.unwrap() {
            Event::FileCompleted {
                completed, total, ..
            } => {
                assert_eq!(completed, 1);
                assert_eq!(total, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::FileCompleted { completed: 2, .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_completions_emit_strictly_increasing_counts() {
        let (tx, mut rx) = broadcast::channel(256);
        let counter = Arc::new(ProgressCounter::new("g/1", 100, Arc::new(tx)));

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let counter = counter.clone();
                tokio::spawn(async move { counter.complete(PathBuf::from(format!("{i}"))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut last = 0;
        for _ in 0..100 {
            match rx.recv().await.unwrap() {
                Event::FileCompleted { completed, .. } => {
                    assert!(completed > last, "{completed} after {last}");
                    last = completed;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(counter.completed().await, 100);
    }

    #[test]
    fn sender_without_subscribers_does_not_panic() {
        let (tx, rx) = broadcast::channel::<Event>(1);
        drop(rx);
        tx.report(Event::NothingToDo {
            thread: "g/1".to_string(),
        });
        NoopReporter.report(Event::NothingToDo {
            thread: "g/1".to_string(),
        });
    }
}
