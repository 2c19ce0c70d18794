use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

use crate::clustering::domain::clustering_results::ClusteringProgress;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusteringPhase {
    #[default]
    Idle,
    Clustering,
    Done,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClusteringStatus {
    pub phase: ClusteringPhase,
    pub completed: usize,
    pub total: usize,
}

impl ClusteringStatus {
    pub fn clustering(progress: ClusteringProgress) -> Self {
        Self {
            phase: ClusteringPhase::Clustering,
            completed: progress.completed,
            total: progress.total,
        }
    }

    pub fn finished(phase: ClusteringPhase, progress: ClusteringProgress) -> Self {
        Self {
            phase,
            completed: progress.completed,
            total: progress.total,
        }
    }
}

struct Subscribers {
    last: ClusteringStatus,
    senders: Vec<Sender<ClusteringStatus>>,
}

/// Fans status updates out to any number of subscribers.
///
/// A new subscriber immediately receives the last published status, so a
/// view that attaches mid-run does not have to wait for the next batch.
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Clone)]
pub struct StatusBroadcaster {
    inner: Arc<Mutex<Subscribers>>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers {
                last: ClusteringStatus::default(),
                senders: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Receiver<ClusteringStatus> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if tx.send(inner.last).is_ok() {
            inner.senders.push(tx);
        }
        rx
    }

    pub fn publish(&self, status: ClusteringStatus) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.last = status;
        inner.senders.retain(|tx| tx.send(status).is_ok());
    }

    /// Last published status.
    pub fn snapshot(&self) -> ClusteringStatus {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .senders
            .len()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
