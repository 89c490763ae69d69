//! Flare - SOS broadcast and ally response coordination
//!
//! A victim sends a flare pointing at harassment evidence. Allies see every
//! flare in a live feed, claim one to take it on and resolve it when done.
//! The victim follows their own open flare as it moves along.
//!
//! All state lives in a [`store::DocumentStore`]; the engine is a thin layer
//! of validation, a small state machine and live projections on top of it.

pub mod clock;
pub mod config;
pub mod flare;
pub mod projection;
pub mod service;
pub mod store;
pub mod types;

pub use config::{Args, FlareConfig, StoreConfig};
pub use flare::{Flare, FlareRepository, FlareStatus, ResolvePolicy};
pub use service::{FlareService, Session};
pub use store::{DocumentStore, MemoryStore};
pub use types::{FlareError, Result};
