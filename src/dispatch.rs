//! Hand-off of drained batches to the application.
//!
//! Contact and group-member changes are delivered inline, before the batch
//! itself is queued. Whole batches go through a bounded queue to a single
//! worker task, so the drain loop never waits on message processing (only on
//! queue capacity) and batches reach the handler in the order they were
//! drained. Every handler failure is logged and contained; none of them can
//! stop the poll loop.

use crate::error::SyncError;
use async_trait::async_trait;
use log::{debug, error, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wxcore::sync::{Record, SyncBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactChange {
    Modify,
    Delete,
}

/// Application hooks invoked by the sync engine.
///
/// Records are passed through untouched; interpreting them is up to the
/// implementor. Every method defaults to a no-op.
#[async_trait]
pub trait SyncEventHandler: Send + Sync {
    async fn on_contacts_changed(
        &self,
        _records: &[Record],
        _change: ContactChange,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_group_members_changed(&self, _records: &[Record]) -> anyhow::Result<()> {
        Ok(())
    }

    /// Receives every drained batch, messages included.
    async fn on_server_event(&self, _batch: Arc<SyncBatch>) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct Dispatcher {
    handler: Arc<dyn SyncEventHandler>,
    queue: mpsc::Sender<Arc<SyncBatch>>,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    /// Starts the worker task. Must be called inside a Tokio runtime.
    pub fn spawn(handler: Arc<dyn SyncEventHandler>, capacity: usize) -> Self {
        let (queue, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(dispatch_worker(handler.clone(), receiver));
        Self {
            handler,
            queue,
            worker,
        }
    }

    /// Delivers the contact and group-member changes of `batch`. Each category
    /// is independent: a failing, panicking or empty one does not hold back
    /// the others.
    pub async fn apply_changes(&self, batch: &Arc<SyncBatch>) {
        if batch.mod_contact.has_changes() {
            let (handler, batch) = (self.handler.clone(), batch.clone());
            deliver("Modified-contacts", async move {
                handler
                    .on_contacts_changed(&batch.mod_contact.records, ContactChange::Modify)
                    .await
            })
            .await;
        }

        if batch.del_contact.has_changes() {
            let (handler, batch) = (self.handler.clone(), batch.clone());
            deliver("Deleted-contacts", async move {
                handler
                    .on_contacts_changed(&batch.del_contact.records, ContactChange::Delete)
                    .await
            })
            .await;
        }

        if batch.mod_chat_room_member.has_changes() {
            let (handler, batch) = (self.handler.clone(), batch.clone());
            deliver("Group-member", async move {
                handler
                    .on_group_members_changed(&batch.mod_chat_room_member.records)
                    .await
            })
            .await;
        }
    }

    /// Queues `batch` for the worker, waiting only if the queue is full.
    pub async fn enqueue(&self, batch: Arc<SyncBatch>) -> Result<(), SyncError> {
        self.queue
            .send(batch)
            .await
            .map_err(|_| SyncError::DispatchClosed)
    }

    /// Stops accepting batches and waits until the queued ones are handled.
    pub async fn close(self) {
        drop(self.queue);
        if let Err(e) = self.worker.await {
            error!(target: "Sync/Dispatch", "Dispatch worker ended abnormally: {e}");
        }
    }
}

async fn dispatch_worker(
    handler: Arc<dyn SyncEventHandler>,
    mut receiver: mpsc::Receiver<Arc<SyncBatch>>,
) {
    while let Some(batch) = receiver.recv().await {
        let handler = handler.clone();
        deliver("Server event", async move { handler.on_server_event(batch).await }).await;
    }
    debug!(target: "Sync/Dispatch", "Dispatch worker shutting down.");
}

/// Runs one handler call in its own task so a panic stays inside it.
async fn deliver<F>(what: &str, call: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    match tokio::spawn(call).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(target: "Sync/Dispatch", "{what} handler failed: {e:?}"),
        Err(e) if e.is_panic() => {
            error!(target: "Sync/Dispatch", "{what} handler panicked: {e}")
        }
        Err(e) => warn!(target: "Sync/Dispatch", "{what} delivery aborted: {e}"),
    }
}
