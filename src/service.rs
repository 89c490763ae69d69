//! Flare service
//!
//! Entry point for a UI shell. The service owns the store, the clock and the
//! repository; a [`Session`] binds them to the signed-in user so the three
//! actions take only the arguments the UI actually has.

use std::sync::Arc;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::{FlareConfig, StoreConfig};
use crate::flare::{validate_actor_id, Flare, FlareRepository, FlareStatus};
use crate::projection::{FeedProjector, VictimStatusProjector};
use crate::store::{DocumentStore, MemoryStore};
use crate::types::Result;

#[derive(Clone)]
pub struct FlareService {
    repository: FlareRepository,
    config: FlareConfig,
}

impl FlareService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: FlareConfig) -> Self {
        info!(
            collection = %config.collection,
            resolve_policy = ?config.resolve_policy,
            "Flare service ready"
        );
        Self {
            repository: FlareRepository::new(store, clock, &config),
            config,
        }
    }

    /// Service over a fresh in-memory store and the system clock
    pub fn in_memory(config: FlareConfig, store_config: StoreConfig) -> Self {
        Self::new(
            Arc::new(MemoryStore::new(store_config)),
            Arc::new(SystemClock),
            config,
        )
    }

    pub fn config(&self) -> &FlareConfig {
        &self.config
    }

    pub fn repository(&self) -> &FlareRepository {
        &self.repository
    }

    /// Act as `user_id`. Fails when nobody is signed in.
    pub fn session(&self, user_id: &str) -> Result<Session> {
        validate_actor_id(user_id, "user")?;
        Ok(Session {
            repository: self.repository.clone(),
            user_id: user_id.to_string(),
        })
    }

    /// Live ally feed, not tied to a user
    pub async fn feed(&self) -> Result<FeedProjector> {
        self.repository.list_flares(FlareStatus::Dismissed).await
    }
}

/// A signed-in user acting as victim or ally
#[derive(Clone)]
pub struct Session {
    repository: FlareRepository,
    user_id: String,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Send an SOS as this user
    pub async fn create_flare(&self, kind: &str, link: &str) -> Result<String> {
        self.repository.create_flare(&self.user_id, kind, link).await
    }

    pub async fn claim_flare(&self, flare_id: &str) -> Result<Flare> {
        self.repository.claim_flare(flare_id, &self.user_id).await
    }

    pub async fn resolve_flare(&self, flare_id: &str) -> Result<Flare> {
        self.repository.resolve_flare(flare_id, &self.user_id).await
    }

    pub async fn feed(&self) -> Result<FeedProjector> {
        self.repository.list_flares(FlareStatus::Dismissed).await
    }

    /// Status of this user's own open flare
    pub async fn my_status(&self) -> Result<VictimStatusProjector> {
        self.repository.watch_victim(&self.user_id).await
    }
}
