//! Snapshot streams delivered by store subscriptions

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::StoredDocument;
use crate::types::Result;

/// The full set of documents matching a subscription at one point in time
pub type Snapshot = Vec<StoredDocument>;

/// Stream of snapshots for one subscription
///
/// Each item replaces the previous one entirely. An `Err` item is terminal:
/// the stream ends right after it. Dropping the stream (or calling
/// [`SnapshotStream::release`]) stops the feeding task.
pub struct SnapshotStream {
    rx: mpsc::Receiver<Result<Snapshot>>,
    task: Option<JoinHandle<()>>,
}

impl SnapshotStream {
    /// Wrap a receiver fed by `task`
    pub fn new(rx: mpsc::Receiver<Result<Snapshot>>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Build a stream from a receiver whose sender is owned elsewhere
    pub fn from_receiver(rx: mpsc::Receiver<Result<Snapshot>>) -> Self {
        Self { rx, task: None }
    }

    /// Release the subscription
    pub fn release(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Stream for SnapshotStream {
    type Item = Result<Snapshot>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        self.stop();
    }
}
