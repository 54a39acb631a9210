//! Store traits consumed by the agent subsystem.
//!
//! Persistence itself is an external collaborator; the core only pins the
//! narrow contracts it needs: a read-only query surface, the pending-action
//! repository with per-id compare-and-set, and the record store that executes
//! confirmed mutations. Implementations live in `opsdesk-db`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::action::{NewPendingAction, PendingAction, PendingActionId, PendingStatus};

/// One result row: column name to plain JSON scalar.
pub type Row = Map<String, Value>;

/// Bound parameter for a read statement. Caller-supplied values never get
/// concatenated into statement text.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryParam {
    Int(i64),
    Text(String),
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Read-only access to the operational database.
///
/// Implementations normalize row values (trim padded strings, collapse
/// date/decimal wrapper types to plain scalars) and acquire/release their
/// connection per call — a connection is never held across a model call.
#[async_trait]
pub trait ReadOnlyStore: Send + Sync {
    async fn query(&self, statement: &str, params: &[QueryParam]) -> Result<Vec<Row>, StoreError>;
}

/// Persistence contract for staged mutations.
///
/// `transition` is the single-writer check-and-set: it succeeds only when the
/// stored status still equals `expected`, so at most one of any number of
/// concurrent confirm attempts wins.
#[async_trait]
pub trait PendingActionStore: Send + Sync {
    async fn create(&self, action: NewPendingAction) -> Result<PendingAction, StoreError>;
    async fn get(&self, id: &PendingActionId) -> Result<Option<PendingAction>, StoreError>;
    async fn list_pending(&self, requested_by: &str) -> Result<Vec<PendingAction>, StoreError>;
    async fn transition(
        &self,
        id: &PendingActionId,
        expected: PendingStatus,
        next: PendingStatus,
        confirmed_by: Option<&str>,
        result: Option<&Value>,
    ) -> Result<bool, StoreError>;
}

/// Outcome of a project creation: generated id plus human-facing code.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ProjectRef {
    pub id: i64,
    pub code: String,
}

/// Narrow mutation surface used by confirmed write tools.
///
/// Each operation appends its own project-timeline entry where applicable so
/// a human can later see why a record changed.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_project(
        &self,
        name: &str,
        customer_id: Option<i64>,
        phase: &str,
        notes: &str,
    ) -> Result<ProjectRef, StoreError>;

    /// Applies the provided field changes; returns a human-readable change
    /// list. Empty `changes` is an error surfaced to the caller.
    async fn update_project(
        &self,
        project_id: i64,
        changes: &Map<String, Value>,
    ) -> Result<Vec<String>, StoreError>;

    async fn create_work_order(
        &self,
        project_id: i64,
        article: Option<String>,
        quantity: i64,
    ) -> Result<i64, StoreError>;

    async fn assign_email_to_project(
        &self,
        email_id: i64,
        project_id: i64,
    ) -> Result<(), StoreError>;
}
