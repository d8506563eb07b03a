use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::database::AnalyticsStore;

/// Non-blocking handle for requesting a per-question analytics refresh.
/// Delivery is best-effort: a full or closed queue drops the request.
#[derive(Clone)]
pub struct AnalyticsQueue {
    tx: mpsc::Sender<i64>,
}

pub struct AnalyticsWorker {
    rx: mpsc::Receiver<i64>,
    store: Arc<dyn AnalyticsStore>,
}

impl AnalyticsQueue {
    pub fn new(store: Arc<dyn AnalyticsStore>, capacity: usize) -> (Self, AnalyticsWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, AnalyticsWorker { rx, store })
    }

    /// Returns whether the request was queued.
    pub fn enqueue(&self, quiz_id: i64) -> bool {
        match self.tx.try_send(quiz_id) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(quiz_id, "Analytics queue full, dropping refresh");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(quiz_id, "Analytics worker stopped, dropping refresh");
                false
            }
        }
    }
}

impl AnalyticsWorker {
    /// Drains the queue until every `AnalyticsQueue` handle is dropped.
    pub async fn run(mut self) {
        while let Some(quiz_id) = self.rx.recv().await {
            self.refresh(quiz_id).await;
        }
        tracing::info!("Analytics worker stopped");
    }

    async fn refresh(&self, quiz_id: i64) {
        match self.store.refresh_quiz_analytics(quiz_id).await {
            Ok(()) => tracing::debug!(quiz_id, "Quiz analytics refreshed"),
            Err(e) => tracing::error!(quiz_id, error = ?e, "Quiz analytics refresh failed"),
        }
    }
}
