//! Ally feed projection
//!
//! Keeps the ordered list of every flare whose status is not the excluded
//! one (Dismissed by default). Order is status rank ascending (Active, In
//! Progress, Resolved, anything else), newest first within a rank. The whole
//! list is rebuilt on each snapshot.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use super::{spawn_projection, ProjectionHandle};
use crate::clock::{minutes_between, Clock};
use crate::flare::model::fields;
use crate::flare::{Flare, FlareStatus, Transition};
use crate::store::{DocumentStore, Predicate};
use crate::types::Result;

/// Feed comparator: status rank, then newest first
pub fn feed_order(a: &Flare, b: &Flare) -> Ordering {
    a.status
        .rank()
        .cmp(&b.status.rank())
        .then_with(|| b.timestamp.cmp(&a.timestamp))
}

/// Sort flares into feed order in place
pub fn order_feed(flares: &mut [Flare]) {
    flares.sort_by(feed_order);
}

/// Abbreviated user id for display: first six characters and an ellipsis
pub fn short_id(id: &str) -> String {
    let head: String = id.chars().take(6).collect();
    format!("{}...", head)
}

/// Projected feed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedState {
    /// No snapshot received yet
    Loading,
    /// Snapshot received and empty
    AllClear,
    /// Flares in feed order
    Flares(Vec<Flare>),
    /// The subscription failed; the feed no longer updates
    Degraded(String),
}

impl FeedState {
    pub fn from_flares(mut flares: Vec<Flare>) -> Self {
        if flares.is_empty() {
            return Self::AllClear;
        }
        order_feed(&mut flares);
        Self::Flares(flares)
    }

    pub fn flares(&self) -> &[Flare] {
        match self {
            Self::Flares(flares) => flares,
            _ => &[],
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// One rendered feed row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub link: String,
    #[serde(skip)]
    pub status: FlareStatus,
    /// Stored status text, kept verbatim for statuses outside the known set
    #[serde(rename = "status")]
    pub status_text: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    pub minutes_ago: i64,
}

impl FeedEntry {
    pub fn from_flare(flare: &Flare, now: i64) -> Self {
        Self {
            id: flare.id.clone(),
            kind: flare.kind.clone(),
            link: flare.link.clone(),
            status: flare.status,
            status_text: flare.status_text().to_string(),
            timestamp: flare.timestamp,
            claimed_by: flare.claimed_by.clone(),
            resolved_by: flare.resolved_by.clone(),
            minutes_ago: minutes_between(flare.timestamp, now),
        }
    }

    pub fn status_label(&self) -> String {
        match self.status {
            FlareStatus::Unknown => self.status_text.to_uppercase(),
            status => status.label().to_string(),
        }
    }

    /// The action an ally can take on this row
    pub fn available_action(&self) -> Option<Transition> {
        match self.status {
            FlareStatus::Active => Some(Transition::Claim),
            FlareStatus::InProgress => Some(Transition::Resolve),
            _ => None,
        }
    }

    /// "You" when the viewer holds the claim, "Ally abc123..." otherwise
    pub fn claimer_display(&self, viewer_id: Option<&str>) -> Option<String> {
        let claimer = self.claimed_by.as_deref()?;
        if viewer_id == Some(claimer) {
            Some("You".to_string())
        } else {
            Some(format!("Ally {}", short_id(claimer)))
        }
    }

    pub fn resolver_display(&self) -> String {
        self.resolved_by
            .as_deref()
            .map(short_id)
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Feed as handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedView {
    Loading,
    AllClear,
    Entries { entries: Vec<FeedEntry> },
    Degraded { reason: String },
}

impl FeedView {
    pub fn from_state(state: &FeedState, now: i64) -> Self {
        match state {
            FeedState::Loading => Self::Loading,
            FeedState::AllClear => Self::AllClear,
            FeedState::Flares(flares) => Self::Entries {
                entries: flares.iter().map(|f| FeedEntry::from_flare(f, now)).collect(),
            },
            FeedState::Degraded(reason) => Self::Degraded {
                reason: reason.clone(),
            },
        }
    }

    pub fn entries(&self) -> &[FeedEntry] {
        match self {
            Self::Entries { entries } => entries,
            _ => &[],
        }
    }
}

/// Live ally feed
pub struct FeedProjector {
    handle: ProjectionHandle<FeedState>,
    clock: Arc<dyn Clock>,
    exclude: FlareStatus,
}

impl FeedProjector {
    /// Subscribe to every flare whose status is not `exclude`
    pub async fn spawn(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        collection: &str,
        exclude: FlareStatus,
    ) -> Result<Self> {
        let stream = store
            .subscribe(
                collection,
                vec![Predicate::ne(fields::STATUS, exclude.as_str())],
            )
            .await?;

        info!(collection, exclude = %exclude, "Feed projector subscribed");

        let handle = spawn_projection(
            "feed",
            stream,
            FeedState::Loading,
            FeedState::from_flares,
            |e| FeedState::Degraded(e.to_string()),
        );

        Ok(Self {
            handle,
            clock,
            exclude,
        })
    }

    pub fn excluded_status(&self) -> FlareStatus {
        self.exclude
    }

    pub fn state(&self) -> FeedState {
        self.handle.current()
    }

    /// Render the current state, computing ages against the clock now
    pub fn view(&self) -> FeedView {
        self.view_at(self.clock.now_millis())
    }

    pub fn view_at(&self, now: i64) -> FeedView {
        FeedView::from_state(&self.handle.current(), now)
    }

    /// Receiver for a presentation layer that reacts to every recompute
    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.handle.receiver()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Wait until the feed state satisfies `ready`
    pub async fn wait_for<F>(&mut self, ready: F) -> Result<FeedState>
    where
        F: FnMut(&FeedState) -> bool,
    {
        self.handle.wait_for(ready).await
    }

    /// Release the subscription
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::flare::NewFlare;
    use crate::store::{DocumentStore, MemoryStore};
    use std::time::Duration;

    fn flare(id: &str, status: FlareStatus, timestamp: i64) -> Flare {
        let mut flare = NewFlare::new("victim", "Threats", "https://x")
            .unwrap()
            .into_flare(timestamp);
        flare.id = id.to_string();
        flare.status = status;
        flare
    }

    fn ids(flares: &[Flare]) -> Vec<&str> {
        flares.iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn test_status_groups_come_first() {
        let state = FeedState::from_flares(vec![
            flare("resolved", FlareStatus::Resolved, 100),
            flare("active", FlareStatus::Active, 50),
            flare("progress", FlareStatus::InProgress, 200),
        ]);
        assert_eq!(ids(state.flares()), vec!["active", "progress", "resolved"]);
    }

    #[test]
    fn test_newest_first_within_group_and_unknown_last() {
        let state = FeedState::from_flares(vec![
            flare("odd", FlareStatus::Unknown, 999),
            flare("old", FlareStatus::Active, 10),
            flare("new", FlareStatus::Active, 30),
            flare("mid", FlareStatus::Active, 20),
        ]);
        assert_eq!(ids(state.flares()), vec!["new", "mid", "old", "odd"]);
    }

    #[test]
    fn test_empty_is_all_clear() {
        assert_eq!(FeedState::from_flares(vec![]), FeedState::AllClear);
        assert_eq!(FeedView::from_state(&FeedState::AllClear, 0), FeedView::AllClear);
    }

    #[test]
    fn test_entry_display_helpers() {
        let mut f = flare("f1", FlareStatus::InProgress, 0);
        f.claimed_by = Some("ally-123456789".to_string());
        let entry = FeedEntry::from_flare(&f, 5 * 60_000);

        assert_eq!(entry.minutes_ago, 5);
        assert_eq!(entry.status_label(), "IN PROGRESS");
        assert_eq!(entry.available_action(), Some(Transition::Resolve));
        assert_eq!(entry.claimer_display(Some("ally-123456789")).as_deref(), Some("You"));
        assert_eq!(entry.claimer_display(None).as_deref(), Some("Ally ally-1..."));
        assert_eq!(entry.resolver_display(), "Unknown");

        let resolved = FeedEntry::from_flare(&flare("f2", FlareStatus::Resolved, 0), 0);
        assert_eq!(resolved.available_action(), None);
    }

    #[test]
    fn test_unknown_status_keeps_stored_text() {
        let mut f = flare("f9", FlareStatus::Unknown, 0);
        f.raw_status = Some("Escalated".to_string());
        let entry = FeedEntry::from_flare(&f, 0);

        assert_eq!(entry.status_label(), "ESCALATED");
        assert_eq!(entry.available_action(), None);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "Escalated");
    }

    #[test]
    fn test_view_serializes_with_state_tag() {
        let view = FeedView::from_state(&FeedState::Flares(vec![flare("f1", FlareStatus::Active, 0)]), 0);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "entries");
        assert_eq!(json["entries"][0]["type"], "Threats");
        assert_eq!(json["entries"][0]["status"], "Active");
        assert!(json["entries"][0].get("claimedBy").is_none());
    }

    #[tokio::test]
    async fn test_projector_excludes_dismissed() {
        let store = MemoryStore::default();
        let clock = Arc::new(ManualClock::new(0));
        let mut dismissed = flare("", FlareStatus::Dismissed, 5);
        dismissed.kind = "Spam".into();
        store.insert("flares", dismissed.to_document().unwrap()).await.unwrap();
        store
            .insert("flares", flare("", FlareStatus::Active, 7).to_document().unwrap())
            .await
            .unwrap();

        let mut feed = FeedProjector::spawn(Arc::new(store), clock, "flares", FlareStatus::Dismissed)
            .await
            .unwrap();
        let state = tokio::time::timeout(
            Duration::from_secs(1),
            feed.wait_for(|s| !matches!(s, FeedState::Loading)),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(state.flares().len(), 1);
        assert_eq!(state.flares()[0].status, FlareStatus::Active);
    }

    #[tokio::test]
    async fn test_projector_degrades_on_outage() {
        let store = MemoryStore::default();
        let mut feed = FeedProjector::spawn(
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(0)),
            "flares",
            FlareStatus::Dismissed,
        )
        .await
        .unwrap();
        tokio::time::timeout(Duration::from_secs(1), feed.wait_for(|s| *s == FeedState::AllClear))
            .await
            .unwrap()
            .unwrap();

        store.go_offline("connection reset");

        let state = tokio::time::timeout(Duration::from_secs(1), feed.wait_for(FeedState::is_degraded))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(feed.view(), FeedView::Degraded { ref reason } if reason.contains("connection reset")));
        assert!(state.is_degraded());
    }
}
