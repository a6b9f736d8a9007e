//! Bounded background worker pool (C7 orchestration): a fixed number of
//! tasks drain a bounded channel of `WorkItem`s so request handlers never
//! block on profile or content re-derivation.

use crate::profile::ProfileUpdater;
use crate::scoring::ScoringEngine;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub enum WorkItem {
    ScoreContent(i64),
    UpdateUser(i64),
    UpdateContent(i64),
}

#[derive(Clone)]
pub struct WorkQueue {
    sender: mpsc::Sender<WorkItem>,
    dropped: Arc<AtomicU64>,
}

impl WorkQueue {
    /// A queue with no worker draining it, for tests that only care
    /// whether a submission was attempted, not whether it ran.
    pub fn disconnected_for_test(capacity: usize) -> Self {
        let (sender, _receiver) = mpsc::channel(capacity);
        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Submits work without blocking. A full queue logs a warning and
    /// increments the dropped-work counter; the caller's subject is
    /// idempotent, so it will simply be retried on the next behavior.
    pub fn submit(&self, item: WorkItem) {
        if self.sender.try_send(item).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(?item, "worker queue full, dropping background work");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Spawns `pool_size` worker tasks draining a channel of capacity
/// `queue_capacity`, and returns a handle submissions can be sent through.
pub fn spawn(
    pool_size: usize,
    queue_capacity: usize,
    scoring: Arc<ScoringEngine>,
    profile_updater: Arc<ProfileUpdater>,
) -> WorkQueue {
    let (sender, receiver) = mpsc::channel(queue_capacity);
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    let dropped = Arc::new(AtomicU64::new(0));

    for worker_id in 0..pool_size {
        let receiver = receiver.clone();
        let scoring = scoring.clone();
        let profile_updater = profile_updater.clone();
        tokio::spawn(async move {
            loop {
                let item = {
                    let mut rx = receiver.lock().await;
                    rx.recv().await
                };
                let Some(item) = item else {
                    debug!(worker_id, "worker channel closed, exiting");
                    break;
                };
                run_item(item, &scoring, &profile_updater).await;
            }
        });
    }

    WorkQueue { sender, dropped }
}

async fn run_item(item: WorkItem, scoring: &ScoringEngine, profile_updater: &ProfileUpdater) {
    match item {
        WorkItem::ScoreContent(content_id) => {
            if let Err(e) = scoring.ensure_scored(content_id).await {
                warn!(content_id, error = %e, "background content scoring failed");
            }
        }
        WorkItem::UpdateUser(user_id) => {
            if let Err(e) = profile_updater.update_user_from_behaviors(user_id, true).await {
                warn!(user_id, error = %e, "background user profile update failed");
            }
        }
        WorkItem::UpdateContent(content_id) => {
            if let Err(e) = profile_updater.update_content_from_users(content_id, false).await {
                warn!(content_id, error = %e, "background content profile update failed");
            }
        }
    }
}
