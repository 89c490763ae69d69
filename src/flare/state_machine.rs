//! Flare state machine
//!
//! ```text
//!   Active ──claim──▶ In Progress ──resolve──▶ Resolved
//!      │                                          ▲
//!      └──────────resolve (AllowDirect only)──────┘
//! ```
//!
//! Transitions are pure: they read a flare and return the patch to persist.
//! A rejected transition returns `InvalidTransition` and touches nothing.

use std::fmt;

use serde_json::Value as JsonValue;
use tracing::debug;

use super::model::{fields, validate_actor_id, Flare, FlareStatus};
use crate::store::Document;
use crate::types::{FlareError, Result};

/// Transitions an ally can attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Claim,
    Resolve,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claim => f.write_str("claim"),
            Self::Resolve => f.write_str("resolve"),
        }
    }
}

/// Whether resolving needs a prior claim
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolvePolicy {
    /// Only `In Progress` flares can be resolved
    #[default]
    RequireClaim,
    /// `Active` flares can also be resolved directly
    AllowDirect,
}

/// Field changes produced by an accepted transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlarePatch {
    Claimed { by: String, at: i64 },
    Resolved { by: String, at: i64 },
}

impl FlarePatch {
    pub fn transition(&self) -> Transition {
        match self {
            Self::Claimed { .. } => Transition::Claim,
            Self::Resolved { .. } => Transition::Resolve,
        }
    }

    pub fn status(&self) -> FlareStatus {
        match self {
            Self::Claimed { .. } => FlareStatus::InProgress,
            Self::Resolved { .. } => FlareStatus::Resolved,
        }
    }

    /// Partial update: only the status and the actor/time pair
    pub fn to_fields(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(fields::STATUS.to_string(), self.status().to_json());
        match self {
            Self::Claimed { by, at } => {
                doc.insert(fields::CLAIMED_BY.to_string(), JsonValue::from(by.as_str()));
                doc.insert(fields::CLAIMED_AT.to_string(), JsonValue::from(*at));
            }
            Self::Resolved { by, at } => {
                doc.insert(fields::RESOLVED_BY.to_string(), JsonValue::from(by.as_str()));
                doc.insert(fields::RESOLVED_AT.to_string(), JsonValue::from(*at));
            }
        }
        doc
    }

    /// Apply the patch to an in-memory copy
    pub fn apply_to(&self, flare: &mut Flare) {
        flare.status = self.status();
        match self {
            Self::Claimed { by, at } => {
                flare.claimed_by = Some(by.clone());
                flare.claimed_at = Some(*at);
            }
            Self::Resolved { by, at } => {
                flare.resolved_by = Some(by.clone());
                flare.resolved_at = Some(*at);
            }
        }
    }
}

/// Validates transitions against a flare's current status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlareStateMachine {
    resolve_policy: ResolvePolicy,
}

impl FlareStateMachine {
    pub fn new(resolve_policy: ResolvePolicy) -> Self {
        Self { resolve_policy }
    }

    pub fn resolve_policy(&self) -> ResolvePolicy {
        self.resolve_policy
    }

    /// Status reached by applying `transition` from `from`, if allowed
    pub fn next_status(&self, from: FlareStatus, transition: Transition) -> Option<FlareStatus> {
        match (from, transition) {
            (FlareStatus::Active, Transition::Claim) => Some(FlareStatus::InProgress),
            (FlareStatus::InProgress, Transition::Resolve) => Some(FlareStatus::Resolved),
            (FlareStatus::Active, Transition::Resolve)
                if self.resolve_policy == ResolvePolicy::AllowDirect =>
            {
                Some(FlareStatus::Resolved)
            }
            _ => None,
        }
    }

    pub fn can_apply(&self, from: FlareStatus, transition: Transition) -> bool {
        self.next_status(from, transition).is_some()
    }

    /// Active → In Progress
    pub fn claim(&self, flare: &Flare, ally_id: &str, now: i64) -> Result<FlarePatch> {
        validate_actor_id(ally_id, "ally")?;
        self.check(flare, Transition::Claim)?;
        Ok(FlarePatch::Claimed {
            by: ally_id.to_string(),
            at: now,
        })
    }

    /// In Progress → Resolved (and Active → Resolved under `AllowDirect`)
    pub fn resolve(&self, flare: &Flare, ally_id: &str, now: i64) -> Result<FlarePatch> {
        validate_actor_id(ally_id, "ally")?;
        self.check(flare, Transition::Resolve)?;
        Ok(FlarePatch::Resolved {
            by: ally_id.to_string(),
            at: now,
        })
    }

    fn check(&self, flare: &Flare, transition: Transition) -> Result<()> {
        if self.can_apply(flare.status, transition) {
            return Ok(());
        }
        debug!(
            flare_id = %flare.id,
            from = %flare.status,
            transition = %transition,
            "Rejected flare transition"
        );
        Err(FlareError::InvalidTransition {
            transition,
            from: flare.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flare::NewFlare;

    fn flare_with(status: FlareStatus) -> Flare {
        let mut flare = NewFlare::new("victim-1", "Threats", "https://x")
            .unwrap()
            .into_flare(100);
        flare.id = "f1".to_string();
        flare.status = status;
        flare
    }

    const ALL: [FlareStatus; 5] = [
        FlareStatus::Active,
        FlareStatus::InProgress,
        FlareStatus::Resolved,
        FlareStatus::Dismissed,
        FlareStatus::Unknown,
    ];

    #[test]
    fn test_claim_only_from_active() {
        let machine = FlareStateMachine::default();
        for status in ALL {
            let flare = flare_with(status);
            let result = machine.claim(&flare, "ally-1", 500);
            if status == FlareStatus::Active {
                assert_eq!(
                    result.unwrap(),
                    FlarePatch::Claimed { by: "ally-1".into(), at: 500 }
                );
            } else {
                assert_eq!(
                    result.unwrap_err(),
                    FlareError::InvalidTransition { transition: Transition::Claim, from: status }
                );
            }
            // the input is never modified
            assert_eq!(flare, flare_with(status));
        }
    }

    #[test]
    fn test_resolve_requires_claim_by_default() {
        let machine = FlareStateMachine::default();
        for status in ALL {
            let result = machine.resolve(&flare_with(status), "ally-1", 900);
            assert_eq!(result.is_ok(), status == FlareStatus::InProgress, "{}", status);
        }
    }

    #[test]
    fn test_direct_resolve_policy() {
        let machine = FlareStateMachine::new(ResolvePolicy::AllowDirect);
        assert!(machine.resolve(&flare_with(FlareStatus::Active), "a", 1).is_ok());
        assert!(machine.resolve(&flare_with(FlareStatus::InProgress), "a", 1).is_ok());
        assert!(machine.resolve(&flare_with(FlareStatus::Resolved), "a", 1).is_err());
    }

    #[test]
    fn test_nothing_leaves_terminal_states() {
        let machine = FlareStateMachine::new(ResolvePolicy::AllowDirect);
        for status in [FlareStatus::Resolved, FlareStatus::Dismissed] {
            assert!(status.is_terminal());
            assert!(!machine.can_apply(status, Transition::Claim));
            assert!(!machine.can_apply(status, Transition::Resolve));
        }
    }

    #[test]
    fn test_signed_out_ally_is_rejected() {
        let machine = FlareStateMachine::default();
        let err = machine.claim(&flare_with(FlareStatus::Active), "", 1).unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn test_patch_fields_and_apply() {
        let patch = FlarePatch::Claimed { by: "ally-7".into(), at: 4_200 };
        let doc = patch.to_fields();
        assert_eq!(doc.len(), 3);
        assert_eq!(doc[fields::STATUS], "In Progress");
        assert_eq!(doc[fields::CLAIMED_BY], "ally-7");
        assert_eq!(doc[fields::CLAIMED_AT], 4_200);

        let mut flare = flare_with(FlareStatus::Active);
        patch.apply_to(&mut flare);
        assert_eq!(flare.status, FlareStatus::InProgress);
        assert_eq!(flare.claimed_by.as_deref(), Some("ally-7"));
        assert!(flare.resolved_by.is_none());
    }
}
