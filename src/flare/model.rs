//! Flare documents
//!
//! A flare is stored as a flat JSON object with camelCase field names:
//!
//! ```text
//! { victimId, type, link, status, timestamp,
//!   claimedBy?, claimedAt?, resolvedBy?, resolvedAt? }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::store::{Document, StoredDocument};
use crate::types::{FlareError, Result};

/// Maximum accepted evidence link length in bytes
pub const MAX_LINK_LEN: usize = 2_048;
/// Maximum accepted incident type length in bytes
pub const MAX_KIND_LEN: usize = 128;
/// Maximum accepted user or flare id length in bytes
pub const MAX_ID_LEN: usize = 128;

/// Stored field names
pub mod fields {
    pub const VICTIM_ID: &str = "victimId";
    pub const KIND: &str = "type";
    pub const LINK: &str = "link";
    pub const STATUS: &str = "status";
    pub const TIMESTAMP: &str = "timestamp";
    pub const CLAIMED_BY: &str = "claimedBy";
    pub const CLAIMED_AT: &str = "claimedAt";
    pub const RESOLVED_BY: &str = "resolvedBy";
    pub const RESOLVED_AT: &str = "resolvedAt";
}

/// Flare lifecycle status
///
/// `Dismissed` is recognised so feeds can filter it out, but nothing in the
/// engine ever produces it. Status strings outside the known set decode as
/// `Unknown` and sort after every known status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlareStatus {
    Active,
    #[serde(rename = "In Progress")]
    InProgress,
    Resolved,
    Dismissed,
    #[serde(other)]
    Unknown,
}

impl FlareStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::InProgress => "In Progress",
            Self::Resolved => "Resolved",
            Self::Dismissed => "Dismissed",
            Self::Unknown => "Unknown",
        }
    }

    /// Feed ordering rank: Active, In Progress, Resolved, then the rest
    pub fn rank(&self) -> u8 {
        match self {
            Self::Active => 1,
            Self::InProgress => 2,
            Self::Resolved => 3,
            Self::Dismissed | Self::Unknown => 4,
        }
    }

    /// Still waiting on an ally (counts toward the one-open-flare rule)
    pub fn is_unresolved(&self) -> bool {
        !matches!(self, Self::Resolved)
    }

    /// No transition leaves this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Dismissed)
    }

    /// Upper-case badge text for feeds
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::InProgress => "IN PROGRESS",
            Self::Resolved => "RESOLVED",
            Self::Dismissed => "DISMISSED",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub(crate) fn to_json(self) -> JsonValue {
        JsonValue::String(self.as_str().to_string())
    }
}

impl fmt::Display for FlareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlareStatus {
    type Err = FlareError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Active" => Ok(Self::Active),
            "In Progress" => Ok(Self::InProgress),
            "Resolved" => Ok(Self::Resolved),
            "Dismissed" => Ok(Self::Dismissed),
            other => Err(FlareError::Validation(format!("unknown flare status '{}'", other))),
        }
    }
}

/// A flare as read from the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flare {
    /// Store-assigned id (not part of the document body)
    #[serde(skip)]
    pub id: String,

    /// Reporting user
    pub victim_id: String,

    /// Incident category
    #[serde(rename = "type")]
    pub kind: String,

    /// Evidence reference
    pub link: String,

    pub status: FlareStatus,

    /// Creation time, epoch millis
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,

    /// Stored status text when `status` is `Unknown`
    #[serde(skip)]
    pub raw_status: Option<String>,
}

impl Flare {
    /// Decode a stored document
    pub fn from_document(doc: &StoredDocument) -> Result<Self> {
        let mut flare: Flare = serde_json::from_value(JsonValue::Object(doc.fields.clone()))
            .map_err(|e| FlareError::Malformed {
                id: doc.id.clone(),
                reason: e.to_string(),
            })?;
        flare.id = doc.id.clone();
        if flare.status == FlareStatus::Unknown {
            flare.raw_status = doc
                .fields
                .get(fields::STATUS)
                .and_then(JsonValue::as_str)
                .map(str::to_string);
        }
        Ok(flare)
    }

    /// Status as stored, including values outside the known set
    pub fn status_text(&self) -> &str {
        match (&self.status, &self.raw_status) {
            (FlareStatus::Unknown, Some(raw)) => raw,
            (status, _) => status.as_str(),
        }
    }

    /// Encode the document body (the id is not included)
    pub fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self)? {
            JsonValue::Object(mut map) => {
                if let (FlareStatus::Unknown, Some(raw)) = (&self.status, &self.raw_status) {
                    map.insert(fields::STATUS.to_string(), JsonValue::from(raw.as_str()));
                }
                Ok(map)
            }
            other => Err(FlareError::Internal(format!(
                "flare serialized to non-object {}",
                other
            ))),
        }
    }
}

/// Decode every flare in a snapshot, skipping documents that do not decode
pub fn decode_flares(docs: &[StoredDocument]) -> Vec<Flare> {
    docs.iter()
        .filter_map(|doc| match Flare::from_document(doc) {
            Ok(flare) => Some(flare),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable flare document");
                None
            }
        })
        .collect()
}

/// Validated input for a new flare
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFlare {
    pub victim_id: String,
    pub kind: String,
    pub link: String,
}

impl NewFlare {
    /// Validate and normalise raw input. The link is trimmed.
    pub fn new(victim_id: &str, kind: &str, link: &str) -> Result<Self> {
        validate_actor_id(victim_id, "victim")?;

        let kind = kind.trim();
        if kind.is_empty() {
            return Err(FlareError::Validation("incident type is required".to_string()));
        }
        if kind.len() > MAX_KIND_LEN {
            return Err(FlareError::Validation(format!(
                "incident type exceeds {} byte limit",
                MAX_KIND_LEN
            )));
        }

        let link = link.trim();
        if link.is_empty() {
            return Err(FlareError::Validation(
                "a link to the harassment is required".to_string(),
            ));
        }
        if link.len() > MAX_LINK_LEN {
            return Err(FlareError::Validation(format!(
                "link exceeds {} byte limit",
                MAX_LINK_LEN
            )));
        }

        Ok(Self {
            victim_id: victim_id.to_string(),
            kind: kind.to_string(),
            link: link.to_string(),
        })
    }

    /// The flare this input becomes at `now`
    pub fn into_flare(self, now: i64) -> Flare {
        Flare {
            id: String::new(),
            victim_id: self.victim_id,
            kind: self.kind,
            link: self.link,
            status: FlareStatus::Active,
            timestamp: now,
            claimed_by: None,
            claimed_at: None,
            resolved_by: None,
            resolved_at: None,
            raw_status: None,
        }
    }
}

/// Reject empty (signed-out) or unsafe actor ids
pub fn validate_actor_id(id: &str, role: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(FlareError::Validation(format!(
            "{} id is required (must be signed in)",
            role
        )));
    }
    check_id_chars(id, role)
}

/// Reject empty or unsafe flare ids
pub fn validate_flare_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(FlareError::Validation("flare id is required".to_string()));
    }
    check_id_chars(id, "flare")
}

fn check_id_chars(id: &str, role: &str) -> Result<()> {
    if id.len() > MAX_ID_LEN {
        return Err(FlareError::Validation(format!(
            "{} id exceeds {} character limit",
            role, MAX_ID_LEN
        )));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(FlareError::Validation(format!(
            "{} id must not contain control characters",
            role
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(id: &str, value: JsonValue) -> StoredDocument {
        StoredDocument::new(id, value.as_object().cloned().unwrap())
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_value(FlareStatus::InProgress).unwrap(), json!("In Progress"));
        let status: FlareStatus = serde_json::from_value(json!("Resolved")).unwrap();
        assert_eq!(status, FlareStatus::Resolved);
        assert_eq!("In Progress".parse::<FlareStatus>().unwrap(), FlareStatus::InProgress);
        assert!("Escalated".parse::<FlareStatus>().is_err());
    }

    #[test]
    fn test_unknown_status_decodes_with_lowest_priority() {
        let status: FlareStatus = serde_json::from_value(json!("Escalated")).unwrap();
        assert_eq!(status, FlareStatus::Unknown);
        assert_eq!(status.rank(), 4);
        assert!(FlareStatus::Active.rank() < FlareStatus::InProgress.rank());
        assert!(FlareStatus::InProgress.rank() < FlareStatus::Resolved.rank());
    }

    #[test]
    fn test_unknown_status_text_is_kept() {
        let doc = stored(
            "f3",
            json!({
                "victimId": "v",
                "type": "Threats",
                "link": "https://x",
                "status": "Escalated",
                "timestamp": 1
            }),
        );
        let flare = Flare::from_document(&doc).unwrap();
        assert_eq!(flare.status, FlareStatus::Unknown);
        assert_eq!(flare.status_text(), "Escalated");
        assert_eq!(flare.to_document().unwrap()[fields::STATUS], "Escalated");

        let known = NewFlare::new("v", "Threats", "https://x").unwrap().into_flare(0);
        assert_eq!(known.status_text(), "Active");
    }

    #[test]
    fn test_document_round_trip_keeps_field_names() {
        let flare = NewFlare::new("victim-1", "Doxxing", " https://example.com/post ")
            .unwrap()
            .into_flare(1_000);
        let doc = flare.to_document().unwrap();

        assert_eq!(doc[fields::VICTIM_ID], "victim-1");
        assert_eq!(doc[fields::KIND], "Doxxing");
        assert_eq!(doc[fields::LINK], "https://example.com/post");
        assert_eq!(doc[fields::STATUS], "Active");
        assert!(!doc.contains_key(fields::CLAIMED_BY));

        let decoded = Flare::from_document(&StoredDocument::new("f1", doc)).unwrap();
        assert_eq!(decoded.id, "f1");
        assert_eq!(decoded.timestamp, 1_000);
    }

    #[test]
    fn test_malformed_document() {
        let err = Flare::from_document(&stored("f9", json!({ "status": "Active" }))).unwrap_err();
        assert!(matches!(err, FlareError::Malformed { ref id, .. } if id == "f9"));
    }

    #[test]
    fn test_decode_flares_skips_malformed() {
        let good = NewFlare::new("v", "Threats", "https://x").unwrap().into_flare(5);
        let docs = vec![
            StoredDocument::new("ok", good.to_document().unwrap()),
            stored("bad", json!({ "link": 42 })),
        ];
        let flares = decode_flares(&docs);
        assert_eq!(flares.len(), 1);
        assert_eq!(flares[0].id, "ok");
    }

    #[test]
    fn test_new_flare_validation() {
        assert!(NewFlare::new("v", "Threats", "   ").is_err());
        assert!(NewFlare::new("", "Threats", "https://x").is_err());
        assert!(NewFlare::new("v", "", "https://x").is_err());
        assert!(NewFlare::new("v", "Threats", &"x".repeat(MAX_LINK_LEN + 1)).is_err());
        assert!(NewFlare::new("v\u{0}", "Threats", "https://x").is_err());
        assert!(NewFlare::new("v", "Threats", &"x".repeat(MAX_LINK_LEN)).is_ok());
    }

    #[test]
    fn test_flare_id_validation_does_not_mention_sign_in() {
        let err = validate_flare_id("").unwrap_err();
        assert_eq!(err, FlareError::Validation("flare id is required".into()));
        assert!(validate_flare_id("f\n1").is_err());
        assert!(validate_flare_id(&"f".repeat(MAX_ID_LEN + 1)).is_err());
        assert!(validate_flare_id("abc123").is_ok());

        let err = validate_actor_id("", "ally").unwrap_err();
        assert!(err.to_string().contains("signed in"));
    }
}
