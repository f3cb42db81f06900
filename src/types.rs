//! Core data types for flowline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 500;

/// A documented exhibition, research project or curation: one node-graph
/// with optional dates for the timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flow {
    /// Client-generated identifier, immutable after creation
    #[serde(rename = "flow_id")]
    pub id: String,

    /// The creating user
    #[serde(rename = "user_id")]
    pub owner_id: String,

    /// Display title
    pub title: String,

    /// Optional longer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Kind of event
    #[serde(rename = "event_type", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    /// When the event starts
    #[serde(rename = "start_date", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the event ends
    #[serde(rename = "end_date", default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Documentation graph (nodes and edges)
    #[serde(flatten)]
    pub graph: Graph,

    /// When first saved
    pub created_at: DateTime<Utc>,

    /// Last overwrite
    pub updated_at: DateTime<Utc>,

    /// 1 on creation, +1 on every update
    pub version: u64,
}

/// Event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Exhibition,
    Research,
    Curation,
}

impl Category {
    /// Human readable name.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Exhibition => "Exhibition",
            Category::Research => "Research",
            Category::Curation => "Curation",
        }
    }

    /// Parse the wire name (`exhibition`, `research`, `curation`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exhibition" => Some(Category::Exhibition),
            "research" => Some(Category::Research),
            "curation" => Some(Category::Curation),
            _ => None,
        }
    }
}

/// The documentation graph attached to a flow. Nodes and edges are kept
/// as raw JSON; their shape belongs to the editor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<serde_json::Value>,

    #[serde(default)]
    pub edges: Vec<serde_json::Value>,
}

/// User profile mirrored from the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub user_id: String,

    pub email: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Validation errors for flows.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyId,
    InvalidId,
    EmptyTitle,
    TitleTooLong,
    InvalidCharacters,
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    InvalidTimestamp,
    InvalidVersion,
    IdInUse,
    UnknownCategory(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyId => write!(f, "flow_id cannot be empty"),
            ValidationError::InvalidId => write!(f, "flow_id contains characters outside [A-Za-z0-9_-]"),
            ValidationError::EmptyTitle => write!(f, "title cannot be empty"),
            ValidationError::TitleTooLong => write!(f, "title exceeds {} characters", MAX_TITLE_LEN),
            ValidationError::InvalidCharacters => write!(f, "title contains control characters"),
            ValidationError::InvalidTimeRange { start, end } => {
                write!(
                    f,
                    "start_date {} is after end_date {}",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                )
            }
            ValidationError::InvalidTimestamp => write!(f, "updated_at cannot be before created_at"),
            ValidationError::InvalidVersion => write!(f, "version must be at least 1"),
            ValidationError::IdInUse => write!(f, "flow_id is already used by another user"),
            ValidationError::UnknownCategory(name) => {
                write!(f, "unknown event_type '{}' (expected exhibition, research or curation)", name)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check that a flow id is usable as part of a store key.
pub fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ValidationError::InvalidId);
    }
    Ok(())
}

impl Flow {
    /// Validate the flow's fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_id(&self.id)?;

        // Title: required, 1-500 chars, no control characters
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(ValidationError::TitleTooLong);
        }
        if self.title.chars().any(|c| c.is_control()) {
            return Err(ValidationError::InvalidCharacters);
        }

        // Only checked when both bounds are present; half-dated flows are legal
        if let (Some(start), Some(end)) = (self.start_time, self.end_time)
            && start > end
        {
            return Err(ValidationError::InvalidTimeRange { start, end });
        }

        if self.updated_at < self.created_at {
            return Err(ValidationError::InvalidTimestamp);
        }

        if self.version == 0 {
            return Err(ValidationError::InvalidVersion);
        }

        Ok(())
    }

    /// Category name for display, "Exhibition" when unset.
    pub fn category_label(&self) -> &'static str {
        self.category.unwrap_or(Category::Exhibition).label()
    }

    /// True when both start and end are set.
    pub fn is_dated(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_flow(title: &str) -> Flow {
        let now = Utc::now();
        Flow {
            id: "fl-test".to_string(),
            owner_id: "user-1".to_string(),
            title: title.to_string(),
            description: None,
            category: None,
            start_time: None,
            end_time: None,
            graph: Graph::default(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[test]
    fn test_flow_validation_valid() {
        let flow = make_flow("Summer show");
        assert!(flow.validate().is_ok());
    }

    #[test]
    fn test_flow_validation_empty_title() {
        assert_eq!(make_flow("").validate(), Err(ValidationError::EmptyTitle));
        assert_eq!(make_flow("   ").validate(), Err(ValidationError::EmptyTitle));
    }

    #[test]
    fn test_flow_validation_title_too_long() {
        let flow = make_flow(&"x".repeat(501));
        assert_eq!(flow.validate(), Err(ValidationError::TitleTooLong));
    }

    #[test]
    fn test_flow_validation_control_chars() {
        let flow = make_flow("Title\x00with null");
        assert_eq!(flow.validate(), Err(ValidationError::InvalidCharacters));
    }

    #[test]
    fn test_flow_validation_bad_id() {
        let mut flow = make_flow("Valid");
        flow.id = "FLOW#1".to_string();
        assert_eq!(flow.validate(), Err(ValidationError::InvalidId));
        flow.id = String::new();
        assert_eq!(flow.validate(), Err(ValidationError::EmptyId));
    }

    #[test]
    fn test_flow_validation_inverted_range() {
        let mut flow = make_flow("Valid");
        let start = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        flow.start_time = Some(start);
        flow.end_time = Some(end);
        assert_eq!(flow.validate(), Err(ValidationError::InvalidTimeRange { start, end }));
    }

    #[test]
    fn test_flow_validation_half_dated_is_ok() {
        let mut flow = make_flow("Valid");
        flow.start_time = Some(Utc::now());
        assert!(flow.validate().is_ok());
        assert!(!flow.is_dated());
    }

    #[test]
    fn test_category_label_fallback() {
        let mut flow = make_flow("Valid");
        assert_eq!(flow.category_label(), "Exhibition");
        flow.category = Some(Category::Research);
        assert_eq!(flow.category_label(), "Research");
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(Category::parse("Curation"), Some(Category::Curation));
        assert_eq!(Category::parse("concert"), None);
    }

    #[test]
    fn test_flow_wire_names() {
        let mut flow = make_flow("Wire");
        flow.category = Some(Category::Curation);
        let json = serde_json::to_value(&flow).unwrap();
        assert_eq!(json["flow_id"], "fl-test");
        assert_eq!(json["user_id"], "user-1");
        assert_eq!(json["event_type"], "curation");
        assert!(json["nodes"].is_array());
        assert!(json["edges"].is_array());
        assert!(json.get("start_date").is_none());

        let back: Flow = serde_json::from_value(json).unwrap();
        assert_eq!(back, flow);
    }
}
