use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingActionId(pub String);

impl std::fmt::Display for PendingActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a staged mutation.
///
/// `Pending` is the only state that accepts a transition; `Rejected` and
/// `Failed` are terminal, and `Confirmed` only ever moves forward into a
/// recorded result or `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Confirmed,
    Rejected,
    Failed,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "rejected" => Some(Self::Rejected),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A mutating tool call staged for human confirmation.
///
/// Created only by the tool dispatch gateway; the write tool itself has not
/// run and produces no side effect until [`crate::actions`] drives the
/// confirm transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: PendingActionId,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    /// Human-readable summary shown to the approver. Built from a per-tool
    /// template, never by invoking the tool.
    pub description: String,
    pub requested_by: String,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Fields supplied by the gateway when staging a new action.
#[derive(Clone, Debug, PartialEq)]
pub struct NewPendingAction {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub description: String,
    pub requested_by: String,
}
