use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use super::coordinator::Command;
use super::error::SchedulerError;
use super::state::{ForceSnapshotAccepted, LiveVisibility, SchedulerStatus};
use crate::snapshot::{Snapshot, SnapshotStore, SnapshotSummary, StorageError};

/// Cheap, cloneable access to the coordinator for request handlers.
///
/// Reads never wait on the coordinator loop: the live report and status are
/// published through watch channels and snapshots are read from the store
/// directly.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    latest: watch::Receiver<Arc<LiveVisibility>>,
    status: watch::Receiver<SchedulerStatus>,
    store: Arc<SnapshotStore>,
}

impl SchedulerHandle {
    pub(super) fn new(
        commands: mpsc::Sender<Command>,
        latest: watch::Receiver<Arc<LiveVisibility>>,
        status: watch::Receiver<SchedulerStatus>,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            commands,
            latest,
            status,
            store,
        }
    }

    pub fn latest_visibility(&self) -> Arc<LiveVisibility> {
        self.latest.borrow().clone()
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.borrow().clone()
    }

    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotSummary>, StorageError> {
        self.store.list().await
    }

    pub async fn get_snapshot(&self, id: i64) -> Result<Snapshot, StorageError> {
        self.store.get(id).await
    }

    /// Ask the coordinator for an out-of-cycle snapshot. With
    /// `wait_for_aircraft` and no aircraft data yet, the save waits for the
    /// next aircraft fetch, up to the configured timeout.
    pub async fn force_snapshot(
        &self,
        wait_for_aircraft: bool,
    ) -> Result<ForceSnapshotAccepted, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ForceSnapshot {
                wait_for_aircraft,
                reply,
            })
            .await
            .map_err(|_| SchedulerError::Stopped)?;
        rx.await.map_err(|_| SchedulerError::Stopped)?
    }
}
