//! Flare lifecycle
//!
//! - [`model`]: the stored flare document and its status
//! - [`state_machine`]: which status changes are allowed
//! - [`repository`]: domain operations translated into store calls

pub mod model;
pub mod repository;
pub mod state_machine;

pub use model::{
    decode_flares, validate_actor_id, validate_flare_id, Flare, FlareStatus, NewFlare,
};
pub use repository::FlareRepository;
pub use state_machine::{FlarePatch, FlareStateMachine, ResolvePolicy, Transition};
