//! Live projections over the flare collection
//!
//! A projector owns one store subscription and one task. Every snapshot the
//! store pushes is decoded and recomputed from scratch into the projector's
//! state, which is published on a `watch` channel so the presentation layer
//! always reads the latest value.
//!
//! ```text
//! DocumentStore ──SnapshotStream──▶ projection task ──watch──▶ FeedProjector
//!                                   (decode + project)        VictimStatusProjector
//! ```
//!
//! A stream error ends the task and leaves the projector in its degraded
//! state. Dropping a projector aborts its task and releases the subscription.

pub mod feed;
pub mod victim;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::flare::{decode_flares, Flare};
use crate::store::SnapshotStream;
use crate::types::{FlareError, Result};

pub use feed::{feed_order, order_feed, short_id, FeedEntry, FeedProjector, FeedState, FeedView};
pub use victim::{
    select_latest, unresolved_predicates, VictimState, VictimStatus, VictimStatusProjector,
    VictimStatusView,
};

/// Task + published state shared by both projectors
pub(crate) struct ProjectionHandle<S> {
    state_rx: watch::Receiver<S>,
    task: JoinHandle<()>,
}

impl<S: Clone> ProjectionHandle<S> {
    pub(crate) fn current(&self) -> S {
        self.state_rx.borrow().clone()
    }

    pub(crate) fn receiver(&self) -> watch::Receiver<S> {
        self.state_rx.clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Wait until the published state satisfies `ready`
    pub(crate) async fn wait_for<F>(&mut self, ready: F) -> Result<S>
    where
        F: FnMut(&S) -> bool,
    {
        self.state_rx
            .wait_for(ready)
            .await
            .map(|state| (*state).clone())
            .map_err(|_| FlareError::Internal("projection stopped".to_string()))
    }
}

impl<S> Drop for ProjectionHandle<S> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Drive `project` from a snapshot stream until the stream ends or fails
pub(crate) fn spawn_projection<S, F, D>(
    name: &'static str,
    mut stream: SnapshotStream,
    initial: S,
    mut project: F,
    degraded: D,
) -> ProjectionHandle<S>
where
    S: Send + Sync + 'static,
    F: FnMut(Vec<Flare>) -> S + Send + 'static,
    D: FnOnce(&FlareError) -> S + Send + 'static,
{
    let (state_tx, state_rx) = watch::channel(initial);

    let task = tokio::spawn(async move {
        debug!(projection = name, "Projection started");

        while let Some(item) = stream.next().await {
            match item {
                Ok(snapshot) => {
                    let flares = decode_flares(&snapshot);
                    debug!(projection = name, flares = flares.len(), "Recomputing projection");
                    state_tx.send_replace(project(flares));
                }
                Err(e) => {
                    warn!(projection = name, error = %e, "Projection stream failed");
                    state_tx.send_replace(degraded(&e));
                    break;
                }
            }
        }

        debug!(projection = name, "Projection stopped");
    });

    ProjectionHandle { state_rx, task }
}
