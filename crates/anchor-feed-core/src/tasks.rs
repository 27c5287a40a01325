//! Background work scheduled by mutations.
//!
//! Mutations never recompute scores or deliver notifications inline. They
//! hand a [`BackgroundTask`] to a [`TaskDispatcher`], which runs it later
//! through a [`TaskHandler`]. The dispatcher is fire-and-forget: no retries,
//! no cancellation, no result reported back to the request.
//!
//! The application crate provides a tokio worker pool; this module provides
//! the handler that does the actual work and a recording dispatcher for tests.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::notify::{EngagementEvent, FanoutService};
use crate::score;
use crate::store::CounterWriter;

#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundTask {
    /// Rewrite an anchor's engagement score from its counters.
    RecomputeScore { anchor_id: Uuid },
    /// Build and deliver the notifications for an event.
    FanOut(EngagementEvent),
}

impl BackgroundTask {
    pub fn name(&self) -> &'static str {
        match self {
            BackgroundTask::RecomputeScore { .. } => "recompute_score",
            BackgroundTask::FanOut(_) => "fan_out",
        }
    }
}

/// Accepts tasks for later execution. Must not block the caller.
pub trait TaskDispatcher: Send + Sync {
    fn dispatch(&self, task: BackgroundTask);
}

/// Executes one task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: BackgroundTask) -> Result<()>;
}

/// Runs score recomputation and notification fan-out.
pub struct EngineTaskHandler {
    counters: Arc<dyn CounterWriter>,
    fanout: FanoutService,
}

impl EngineTaskHandler {
    pub fn new(counters: Arc<dyn CounterWriter>, fanout: FanoutService) -> Self {
        Self { counters, fanout }
    }
}

#[async_trait]
impl TaskHandler for EngineTaskHandler {
    async fn handle(&self, task: BackgroundTask) -> Result<()> {
        match task {
            BackgroundTask::RecomputeScore { anchor_id } => {
                let score = score::recompute(self.counters.as_ref(), anchor_id).await?;
                debug!(anchor = %anchor_id, score = ?score, "score recomputed");
            }
            BackgroundTask::FanOut(event) => {
                self.fanout.fan_out(&event).await?;
            }
        }
        Ok(())
    }
}

/// Collects dispatched tasks instead of running them.
#[derive(Default)]
pub struct RecordingDispatcher {
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything dispatched so far.
    pub fn take(&self) -> Vec<BackgroundTask> {
        match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl TaskDispatcher for RecordingDispatcher {
    fn dispatch(&self, task: BackgroundTask) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push(task),
            Err(poisoned) => poisoned.into_inner().push(task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::AnchorRef;
    use crate::store::memory::{test_anchor, InMemoryStore};
    use crate::store::{ContentReader, Counter};

    fn handler(store: &Arc<InMemoryStore>) -> EngineTaskHandler {
        let fanout = FanoutService::new(store.clone(), store.clone(), store.clone());
        EngineTaskHandler::new(store.clone(), fanout)
    }

    #[tokio::test]
    async fn test_recompute_task_writes_score() {
        let store = Arc::new(InMemoryStore::new());
        let anchor = test_anchor(Uuid::new_v4(), "a");
        let id = anchor.id;
        store.insert_anchor(anchor);
        store.increment_counter(Counter::Clones, id, 2).await.unwrap();

        handler(&store)
            .handle(BackgroundTask::RecomputeScore { anchor_id: id })
            .await
            .unwrap();
        assert_eq!(store.get_anchor(id).await.unwrap().unwrap().engagement_score, 6);
    }

    #[tokio::test]
    async fn test_fan_out_task_delivers() {
        let store = Arc::new(InMemoryStore::new());
        let anchor = test_anchor(Uuid::new_v4(), "a");
        let event = EngagementEvent::Liked {
            actor_id: Uuid::new_v4(),
            anchor: AnchorRef::from(&anchor),
        };
        handler(&store)
            .handle(BackgroundTask::FanOut(event))
            .await
            .unwrap();
        assert_eq!(store.notifications().len(), 1);
    }

    #[test]
    fn test_recording_dispatcher_drains() {
        let d = RecordingDispatcher::new();
        let id = Uuid::new_v4();
        d.dispatch(BackgroundTask::RecomputeScore { anchor_id: id });
        let tasks = d.take();
        assert_eq!(tasks, vec![BackgroundTask::RecomputeScore { anchor_id: id }]);
        assert!(d.take().is_empty());
    }
}
