//! Victim status projection
//!
//! Follows one victim's unresolved flares. The one-open-flare rule means at
//! most one is expected; when a race lets a second through, the newest one
//! (ties broken by id) is shown and the rest are ignored.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use super::feed::short_id;
use super::{spawn_projection, ProjectionHandle};
use crate::clock::{minutes_between, Clock};
use crate::flare::model::fields;
use crate::flare::{Flare, FlareStatus};
use crate::store::{DocumentStore, Predicate};
use crate::types::Result;

/// Newest flare by timestamp, then by id
pub fn select_latest(mut flares: Vec<Flare>) -> Option<Flare> {
    if flares.len() > 1 {
        warn!(
            victim_id = %flares[0].victim_id,
            count = flares.len(),
            "Multiple unresolved flares for one victim; showing the newest"
        );
    }
    flares.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    flares.pop()
}

/// Predicates selecting one victim's unresolved flares
pub fn unresolved_predicates(victim_id: &str) -> Vec<Predicate> {
    vec![
        Predicate::eq(fields::VICTIM_ID, victim_id),
        Predicate::ne(fields::STATUS, FlareStatus::Resolved.as_str()),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VictimState {
    Loading,
    /// No unresolved flare
    Hidden,
    Tracking(Flare),
    Degraded(String),
}

impl VictimState {
    pub fn from_flares(flares: Vec<Flare>) -> Self {
        match select_latest(flares) {
            Some(flare) => Self::Tracking(flare),
            None => Self::Hidden,
        }
    }

    pub fn flare(&self) -> Option<&Flare> {
        match self {
            Self::Tracking(flare) => Some(flare),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VictimStatus {
    Loading,
    None,
    Active,
    InProgress,
    Unknown,
    Degraded,
}

/// What the victim sees
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VictimStatusView {
    pub status: VictimStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flare_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_since_claim: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VictimStatusView {
    fn bare(status: VictimStatus) -> Self {
        Self {
            status,
            flare_id: None,
            claimed_by: None,
            minutes_since_claim: None,
            reason: None,
        }
    }

    pub fn from_state(state: &VictimState, now: i64) -> Self {
        match state {
            VictimState::Loading => Self::bare(VictimStatus::Loading),
            VictimState::Hidden => Self::bare(VictimStatus::None),
            VictimState::Degraded(reason) => Self {
                reason: Some(reason.clone()),
                ..Self::bare(VictimStatus::Degraded)
            },
            VictimState::Tracking(flare) => {
                let status = match flare.status {
                    FlareStatus::Active => VictimStatus::Active,
                    FlareStatus::InProgress => VictimStatus::InProgress,
                    _ => VictimStatus::Unknown,
                };
                let minutes_since_claim = match status {
                    VictimStatus::InProgress => flare.claimed_at.map(|at| minutes_between(at, now)),
                    _ => None,
                };
                Self {
                    status,
                    flare_id: Some(flare.id.clone()),
                    claimed_by: flare.claimed_by.clone(),
                    minutes_since_claim,
                    reason: None,
                }
            }
        }
    }

    /// Whether the status panel should be shown at all
    pub fn is_visible(&self) -> bool {
        matches!(
            self.status,
            VictimStatus::Active | VictimStatus::InProgress | VictimStatus::Unknown
        )
    }

    pub fn headline(&self) -> &'static str {
        match self.status {
            VictimStatus::Active => "Flare Active, Awaiting Ally Claim...",
            VictimStatus::InProgress => "Ally Action In Progress!",
            VictimStatus::Unknown => "Status Unknown.",
            VictimStatus::Loading => "Loading...",
            VictimStatus::None => "",
            VictimStatus::Degraded => "Status unavailable.",
        }
    }

    pub fn detail(&self) -> String {
        match self.status {
            VictimStatus::Active => {
                "The network is reviewing your SOS now. This is a crucial time.".to_string()
            }
            VictimStatus::InProgress => {
                let ally = self
                    .claimed_by
                    .as_deref()
                    .map(short_id)
                    .unwrap_or_else(|| "unknown".to_string());
                match self.minutes_since_claim {
                    Some(minutes) => format!(
                        "An Ally ({}) is actively working on your case. Claimed {} minutes ago.",
                        ally, minutes
                    ),
                    None => format!("An Ally ({}) is actively working on your case.", ally),
                }
            }
            VictimStatus::Degraded => self.reason.clone().unwrap_or_default(),
            _ => String::new(),
        }
    }
}

/// Live status of one victim's open flare
pub struct VictimStatusProjector {
    handle: ProjectionHandle<VictimState>,
    clock: Arc<dyn Clock>,
    victim_id: String,
}

impl VictimStatusProjector {
    pub async fn spawn(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        collection: &str,
        victim_id: &str,
    ) -> Result<Self> {
        let stream = store
            .subscribe(collection, unresolved_predicates(victim_id))
            .await?;

        info!(collection, victim_id, "Victim status projector subscribed");

        let handle = spawn_projection(
            "victim_status",
            stream,
            VictimState::Loading,
            VictimState::from_flares,
            |e| VictimState::Degraded(e.to_string()),
        );

        Ok(Self {
            handle,
            clock,
            victim_id: victim_id.to_string(),
        })
    }

    pub fn victim_id(&self) -> &str {
        &self.victim_id
    }

    pub fn state(&self) -> VictimState {
        self.handle.current()
    }

    /// Render against the clock now; elapsed minutes are never cached
    pub fn view(&self) -> VictimStatusView {
        self.view_at(self.clock.now_millis())
    }

    pub fn view_at(&self, now: i64) -> VictimStatusView {
        VictimStatusView::from_state(&self.handle.current(), now)
    }

    pub fn subscribe(&self) -> watch::Receiver<VictimState> {
        self.handle.receiver()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub async fn wait_for<F>(&mut self, ready: F) -> Result<VictimState>
    where
        F: FnMut(&VictimState) -> bool,
    {
        self.handle.wait_for(ready).await
    }

    /// Release the subscription
    pub fn release(self) {}
}
