//! Flare repository
//!
//! Translates the three flare actions into store calls and hands out live
//! projections of the collection. The repository holds no flare state of its
//! own; the store is the only source of truth.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::model::{
    decode_flares, fields, validate_actor_id, validate_flare_id, Flare, FlareStatus, NewFlare,
};
use super::state_machine::{FlarePatch, FlareStateMachine};
use crate::clock::Clock;
use crate::config::FlareConfig;
use crate::projection::{
    order_feed, unresolved_predicates, FeedProjector, VictimStatusProjector,
};
use crate::store::{
    ConditionalInsert, ConditionalUpdate, DocumentStore, Predicate, StoredDocument,
};
use crate::types::{FlareError, Result};

/// Flare operations over a [`DocumentStore`]
#[derive(Clone)]
pub struct FlareRepository {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    machine: FlareStateMachine,
    collection: String,
}

impl FlareRepository {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: &FlareConfig) -> Self {
        Self {
            store,
            clock,
            machine: FlareStateMachine::new(config.resolve_policy),
            collection: config.collection.clone(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn state_machine(&self) -> &FlareStateMachine {
        &self.machine
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Send a new flare for `victim_id`
    ///
    /// Fails with `DuplicateActiveFlare` when the victim already has an
    /// unresolved flare; in that case nothing is written. Returns the new id.
    pub async fn create_flare(&self, victim_id: &str, kind: &str, link: &str) -> Result<String> {
        let input = NewFlare::new(victim_id, kind, link)?;
        let flare = input.into_flare(self.clock.now_millis());
        let document = flare.to_document()?;

        let outcome = self
            .store
            .insert_unless_exists(&self.collection, &unresolved_predicates(victim_id), document)
            .await?;

        match outcome {
            ConditionalInsert::Inserted(id) => {
                info!(
                    flare_id = %id,
                    victim_id,
                    kind = %flare.kind,
                    "Flare created"
                );
                Ok(id)
            }
            ConditionalInsert::Blocked { existing } => {
                let existing = existing.into_iter().min().unwrap_or_default();
                warn!(
                    victim_id,
                    existing = %existing,
                    "Refusing second unresolved flare"
                );
                Err(FlareError::DuplicateActiveFlare {
                    victim_id: victim_id.to_string(),
                    existing,
                })
            }
        }
    }

    /// Active → In Progress on behalf of `ally_id`
    pub async fn claim_flare(&self, flare_id: &str, ally_id: &str) -> Result<Flare> {
        let mut flare = self.get_flare(flare_id).await?;
        let patch = self.machine.claim(&flare, ally_id, self.clock.now_millis())?;
        self.persist(&mut flare, patch).await?;
        info!(flare_id, ally_id, "Flare claimed");
        Ok(flare)
    }

    /// In Progress → Resolved on behalf of `ally_id`
    pub async fn resolve_flare(&self, flare_id: &str, ally_id: &str) -> Result<Flare> {
        let mut flare = self.get_flare(flare_id).await?;
        let patch = self.machine.resolve(&flare, ally_id, self.clock.now_millis())?;
        self.persist(&mut flare, patch).await?;
        info!(flare_id, ally_id, "Flare resolved");
        Ok(flare)
    }

    /// Write the patch only if the stored status is still the one the
    /// transition was checked against
    async fn persist(&self, flare: &mut Flare, patch: FlarePatch) -> Result<()> {
        let guard = [Predicate::eq(fields::STATUS, flare.status_text())];
        let outcome = self
            .store
            .update_fields_where(&self.collection, &flare.id, &guard, patch.to_fields())
            .await?;

        match outcome {
            ConditionalUpdate::Updated => {
                patch.apply_to(flare);
                Ok(())
            }
            ConditionalUpdate::Blocked { current } => {
                let from = Flare::from_document(&StoredDocument::new(flare.id.clone(), current))
                    .map(|current| current.status)
                    .unwrap_or(FlareStatus::Unknown);
                warn!(
                    flare_id = %flare.id,
                    loaded = %flare.status,
                    current = %from,
                    transition = %patch.transition(),
                    "Flare changed before the transition was written"
                );
                Err(FlareError::InvalidTransition {
                    transition: patch.transition(),
                    from,
                })
            }
        }
    }

    pub async fn get_flare(&self, flare_id: &str) -> Result<Flare> {
        validate_flare_id(flare_id)?;
        match self.store.get(&self.collection, flare_id).await? {
            Some(doc) => Flare::from_document(&doc),
            None => {
                debug!(flare_id, "Flare not found");
                Err(FlareError::NotFound(format!("flare {}", flare_id)))
            }
        }
    }

    /// Unresolved flares of one victim, newest first
    pub async fn unresolved_for_victim(&self, victim_id: &str) -> Result<Vec<Flare>> {
        let docs = self
            .store
            .query_where(&self.collection, &unresolved_predicates(victim_id))
            .await?;
        let mut flares = decode_flares(&docs);
        flares.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(flares)
    }

    /// One-shot feed listing in feed order
    pub async fn snapshot_flares(&self, exclude: FlareStatus) -> Result<Vec<Flare>> {
        let docs = self
            .store
            .query_where(
                &self.collection,
                &[Predicate::ne(fields::STATUS, exclude.as_str())],
            )
            .await?;
        let mut flares = decode_flares(&docs);
        order_feed(&mut flares);
        Ok(flares)
    }

    /// Live feed of every flare whose status is not `exclude`
    pub async fn list_flares(&self, exclude: FlareStatus) -> Result<FeedProjector> {
        FeedProjector::spawn(
            self.store.clone(),
            self.clock.clone(),
            &self.collection,
            exclude,
        )
        .await
    }

    /// Live status of `victim_id`'s open flare
    pub async fn watch_victim(&self, victim_id: &str) -> Result<VictimStatusProjector> {
        validate_actor_id(victim_id, "victim")?;
        VictimStatusProjector::spawn(
            self.store.clone(),
            self.clock.clone(),
            &self.collection,
            victim_id,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::flare::{ResolvePolicy, Transition};
    use crate::store::MemoryStore;

    fn setup(policy: ResolvePolicy) -> (FlareRepository, MemoryStore, Arc<ManualClock>) {
        let store = MemoryStore::default();
        let clock = Arc::new(ManualClock::new(1_000));
        let config = FlareConfig {
            resolve_policy: policy,
            ..FlareConfig::default()
        };
        let repo = FlareRepository::new(Arc::new(store.clone()), clock.clone(), &config);
        (repo, store, clock)
    }

    #[tokio::test]
    async fn test_create_stores_active_flare() {
        let (repo, _store, _clock) = setup(ResolvePolicy::RequireClaim);
        let id = repo.create_flare("victim-1", "Doxxing", " https://x ").await.unwrap();

        let flare = repo.get_flare(&id).await.unwrap();
        assert_eq!(flare.status, FlareStatus::Active);
        assert_eq!(flare.timestamp, 1_000);
        assert_eq!(flare.link, "https://x");
        assert!(flare.claimed_by.is_none());
    }

    #[tokio::test]
    async fn test_second_unresolved_flare_is_refused_without_write() {
        let (repo, store, _clock) = setup(ResolvePolicy::RequireClaim);
        let first = repo.create_flare("victim-1", "Threats", "https://a").await.unwrap();

        let err = repo.create_flare("victim-1", "Threats", "https://b").await.unwrap_err();
        assert_eq!(
            err,
            FlareError::DuplicateActiveFlare {
                victim_id: "victim-1".into(),
                existing: first.clone(),
            }
        );
        assert_eq!(store.len("flares"), 1);

        // a claimed flare still blocks
        repo.claim_flare(&first, "ally-1").await.unwrap();
        assert!(repo.create_flare("victim-1", "Threats", "https://b").await.is_err());

        // a resolved one does not
        repo.resolve_flare(&first, "ally-1").await.unwrap();
        assert!(repo.create_flare("victim-1", "Threats", "https://b").await.is_ok());
    }

    #[tokio::test]
    async fn test_claim_then_resolve() {
        let (repo, store, clock) = setup(ResolvePolicy::RequireClaim);
        let id = repo.create_flare("victim-1", "Threats", "https://a").await.unwrap();

        clock.advance_minutes(2);
        let claimed = repo.claim_flare(&id, "ally-1").await.unwrap();
        assert_eq!(claimed.status, FlareStatus::InProgress);
        assert_eq!(claimed.claimed_at, Some(1_000 + 120_000));

        clock.advance_minutes(3);
        let resolved = repo.resolve_flare(&id, "ally-2").await.unwrap();
        assert_eq!(resolved.status, FlareStatus::Resolved);
        assert_eq!(resolved.claimed_by.as_deref(), Some("ally-1"));
        assert_eq!(resolved.resolved_by.as_deref(), Some("ally-2"));

        let stored = store.get("flares", &id).await.unwrap().unwrap();
        assert_eq!(stored.fields[fields::LINK], "https://a");
        assert_eq!(stored.fields[fields::RESOLVED_AT], 1_000 + 300_000);
    }

    #[tokio::test]
    async fn test_second_resolve_is_rejected() {
        let (repo, _store, _clock) = setup(ResolvePolicy::RequireClaim);
        let id = repo.create_flare("victim-1", "Threats", "https://a").await.unwrap();
        repo.claim_flare(&id, "ally-1").await.unwrap();
        repo.resolve_flare(&id, "ally-1").await.unwrap();

        let err = repo.resolve_flare(&id, "ally-1").await.unwrap_err();
        assert_eq!(
            err,
            FlareError::InvalidTransition {
                transition: Transition::Resolve,
                from: FlareStatus::Resolved,
            }
        );
        assert_eq!(repo.get_flare(&id).await.unwrap().status, FlareStatus::Resolved);
    }

    #[tokio::test]
    async fn test_resolve_policy() {
        let (strict, _s, _c) = setup(ResolvePolicy::RequireClaim);
        let id = strict.create_flare("v", "Threats", "https://a").await.unwrap();
        let err = strict.resolve_flare(&id, "ally").await.unwrap_err();
        assert_eq!(
            err,
            FlareError::InvalidTransition {
                transition: Transition::Resolve,
                from: FlareStatus::Active,
            }
        );
        let untouched = strict.get_flare(&id).await.unwrap();
        assert_eq!(untouched.status, FlareStatus::Active);
        assert!(untouched.resolved_by.is_none());
        assert!(untouched.resolved_at.is_none());

        let (loose, _s, _c) = setup(ResolvePolicy::AllowDirect);
        let id = loose.create_flare("v", "Threats", "https://a").await.unwrap();
        let flare = loose.resolve_flare(&id, "ally").await.unwrap();
        assert_eq!(flare.status, FlareStatus::Resolved);
        assert!(flare.claimed_by.is_none());
    }

    #[tokio::test]
    async fn test_stale_claim_cannot_reopen_resolved_flare() {
        let (repo, store, _clock) = setup(ResolvePolicy::RequireClaim);
        let id = repo.create_flare("victim-1", "Threats", "https://a").await.unwrap();

        // loaded while Active, then resolved elsewhere before the write
        let mut stale = repo.get_flare(&id).await.unwrap();
        repo.claim_flare(&id, "ally-b").await.unwrap();
        repo.resolve_flare(&id, "ally-b").await.unwrap();

        let patch = repo.state_machine().claim(&stale, "ally-a", 5).unwrap();
        let err = repo.persist(&mut stale, patch).await.unwrap_err();
        assert_eq!(
            err,
            FlareError::InvalidTransition {
                transition: Transition::Claim,
                from: FlareStatus::Resolved,
            }
        );
        assert_eq!(stale.status, FlareStatus::Active);

        let stored = store.get("flares", &id).await.unwrap().unwrap();
        assert_eq!(stored.fields[fields::STATUS], "Resolved");
        assert_eq!(stored.fields[fields::CLAIMED_BY], "ally-b");
        assert!(repo.unresolved_for_victim("victim-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_flare_id_is_rejected_without_sign_in_wording() {
        let (repo, _store, _clock) = setup(ResolvePolicy::RequireClaim);
        let err = repo.get_flare(" ").await.unwrap_err();
        assert_eq!(err, FlareError::Validation("flare id is required".into()));
    }

    #[tokio::test]
    async fn test_unknown_flare_is_not_found() {
        let (repo, _store, _clock) = setup(ResolvePolicy::RequireClaim);
        let err = repo.claim_flare("missing", "ally-1").await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_snapshot_flares_orders_and_excludes() {
        let (repo, _store, clock) = setup(ResolvePolicy::RequireClaim);
        let a = repo.create_flare("victim-a", "Threats", "https://a").await.unwrap();
        clock.advance_millis(10);
        let b = repo.create_flare("victim-b", "Threats", "https://b").await.unwrap();
        clock.advance_millis(10);
        let c = repo.create_flare("victim-c", "Threats", "https://c").await.unwrap();
        repo.claim_flare(&a, "ally").await.unwrap();

        let ids: Vec<String> = repo
            .snapshot_flares(FlareStatus::Dismissed)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![c, b, a.clone()]);

        let without_progress = repo.snapshot_flares(FlareStatus::InProgress).await.unwrap();
        assert!(without_progress.iter().all(|f| f.id != a));

        assert_eq!(repo.unresolved_for_victim("victim-a").await.unwrap().len(), 1);
        assert!(repo.unresolved_for_victim("nobody").await.unwrap().is_empty());
    }
}
