//! Request and response types shared by the HTTP server and the service.

use crate::error::FlowError;
use crate::lanes::LaneLayout;
use crate::pagination::Page;
use crate::store::SaveFlow;
use crate::types::{Category, Flow, Graph, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Paging parameters exactly as they arrived in the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// JSON body of a save request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveBody {
    #[serde(default)]
    pub flow_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub nodes: Option<Vec<Value>>,
    #[serde(default)]
    pub edges: Option<Vec<Value>>,
    /// Write only if the stored version matches (0: must not exist).
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl SaveBody {
    /// Check required fields and convert to a store draft.
    pub fn into_draft(self) -> Result<(SaveFlow, Option<u64>), FlowError> {
        let id = self
            .flow_id
            .filter(|s| !s.is_empty())
            .ok_or(FlowError::MissingField("flow_id"))?;
        let title = self.title.filter(|s| !s.is_empty()).ok_or(FlowError::MissingField("title"))?;
        let nodes = self.nodes.ok_or(FlowError::MissingField("nodes"))?;
        let edges = self.edges.ok_or(FlowError::MissingField("edges"))?;

        let category = match self.event_type.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(name) => Some(
                Category::parse(name).ok_or_else(|| ValidationError::UnknownCategory(name.to_string()))?,
            ),
        };

        let draft = SaveFlow {
            id,
            title,
            description: self.description,
            category,
            start_time: self.start_date,
            end_time: self.end_date,
            graph: Graph { nodes, edges },
        };
        Ok((draft, self.expected_version))
    }
}

/// Requests the service understands. `auth` is the raw `Authorization`
/// header.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Everyone's flows, newest first.
    ListPublic { page: PageParams },

    /// Lane layout over every dated flow.
    PublicTimeline,

    /// One owned flow when `flow_id` is set, otherwise a page of them.
    Load {
        auth: Option<String>,
        flow_id: Option<String>,
        page: PageParams,
    },

    Save { auth: Option<String>, body: SaveBody },

    Delete {
        auth: Option<String>,
        flow_id: Option<String>,
    },

    /// Lane layout over the caller's dated flows.
    OwnedTimeline { auth: Option<String> },

    /// Create the caller's profile if missing.
    SyncUser {
        auth: Option<String>,
        name: Option<String>,
        description: Option<String>,
    },

    Ping,
}

/// Pagination block of list responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub limit: usize,
}

impl Pagination {
    pub fn of<T>(page: &Page<T>, limit: usize) -> Self {
        Self {
            has_more: page.has_more,
            next_cursor: page.next_cursor.clone(),
            limit,
        }
    }
}

/// A flow as shown to anyone: no owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicFlow {
    pub flow_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub graph: Graph,
}

impl From<Flow> for PublicFlow {
    fn from(flow: Flow) -> Self {
        Self {
            flow_id: flow.id,
            title: flow.title,
            description: flow.description,
            event_type: flow.category,
            start_date: flow.start_time,
            end_date: flow.end_time,
            created_at: flow.created_at,
            updated_at: flow.updated_at,
            graph: flow.graph,
        }
    }
}

/// One bar on a timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub flow_id: String,
    pub title: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl From<&Flow> for TimelineEntry {
    fn from(flow: &Flow) -> Self {
        Self {
            flow_id: flow.id.clone(),
            title: flow.title.clone(),
            event_type: flow.category_label().to_string(),
            start_date: flow.start_time,
            end_date: flow.end_time,
        }
    }
}

/// A flow left off a timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedEntry {
    pub flow_id: String,
    pub error: String,
}

/// Lane layout in wire form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub lanes: Vec<Vec<TimelineEntry>>,
    pub undated: Vec<TimelineEntry>,
    pub rejected: Vec<RejectedEntry>,
}

impl From<LaneLayout<'_, Flow>> for Timeline {
    fn from(layout: LaneLayout<'_, Flow>) -> Self {
        Self {
            lanes: layout
                .lanes
                .iter()
                .map(|lane| lane.iter().map(|f| TimelineEntry::from(*f)).collect())
                .collect(),
            undated: layout.undated.iter().map(|f| TimelineEntry::from(*f)).collect(),
            rejected: layout
                .rejected
                .iter()
                .map(|r| RejectedEntry {
                    flow_id: r.event.id.clone(),
                    error: r.error.to_string(),
                })
                .collect(),
        }
    }
}

/// Service responses.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// A page of the caller's flows.
    Flows { flows: Vec<Flow>, pagination: Pagination },

    /// A page of everyone's flows.
    PublicFlows {
        flows: Vec<PublicFlow>,
        pagination: Pagination,
    },

    Flow { flow: Flow },

    Saved { flow_id: String, version: u64 },

    Deleted { flow_id: String },

    Timeline { timeline: Timeline },

    UserSynced { user_id: String, already_exists: bool },

    Pong,

    Error { status: u16, message: String },
}

impl Response {
    /// Create an error response.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::Error {
            status,
            message: message.into(),
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            Response::Error { status, .. } => *status,
            _ => 200,
        }
    }

    /// JSON body.
    pub fn body(&self) -> Value {
        match self {
            Response::Flows { flows, pagination } => json!({
                "success": true,
                "flows": flows,
                "pagination": pagination,
            }),
            Response::PublicFlows { flows, pagination } => json!({
                "success": true,
                "flows": flows,
                "pagination": pagination,
            }),
            Response::Flow { flow } => json!({ "success": true, "flow": flow }),
            Response::Saved { flow_id, version } => json!({
                "success": true,
                "flow_id": flow_id,
                "version": version,
                "message": "Flow saved successfully",
            }),
            Response::Deleted { flow_id } => json!({
                "success": true,
                "flow_id": flow_id,
                "message": "Flow deleted successfully",
            }),
            Response::Timeline { timeline } => json!({
                "success": true,
                "lanes": timeline.lanes,
                "undated": timeline.undated,
                "rejected": timeline.rejected,
            }),
            Response::UserSynced {
                user_id,
                already_exists,
            } => json!({
                "success": true,
                "userId": user_id,
                "alreadyExists": already_exists,
                "message": if *already_exists { "User already exists" } else { "User synced" },
            }),
            Response::Pong => json!({ "success": true, "status": "ok" }),
            Response::Error { message, .. } => json!({ "error": message }),
        }
    }
}
