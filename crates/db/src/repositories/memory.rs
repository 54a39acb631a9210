//! In-memory store implementations for tests and offline wiring.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use opsdesk_core::domain::action::{
    NewPendingAction, PendingAction, PendingActionId, PendingStatus,
};
use opsdesk_core::store::{
    PendingActionStore, ProjectRef, QueryParam, ReadOnlyStore, RecordStore, Row, StoreError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Returns pre-canned rows for any statement; records what was asked.
#[derive(Clone, Default)]
pub struct InMemoryReadOnlyStore {
    rows: Arc<Mutex<Vec<Row>>>,
    statements: Arc<Mutex<Vec<String>>>,
}

impl InMemoryReadOnlyStore {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self { rows: Arc::new(Mutex::new(rows)), statements: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }
}

#[async_trait::async_trait]
impl ReadOnlyStore for InMemoryReadOnlyStore {
    async fn query(&self, statement: &str, _params: &[QueryParam]) -> Result<Vec<Row>, StoreError> {
        lock(&self.statements).push(statement.to_string());
        Ok(lock(&self.rows).clone())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPendingActionStore {
    actions: Arc<Mutex<HashMap<PendingActionId, PendingAction>>>,
}

impl InMemoryPendingActionStore {
    pub fn all(&self) -> Vec<PendingAction> {
        lock(&self.actions).values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl PendingActionStore for InMemoryPendingActionStore {
    async fn create(&self, action: NewPendingAction) -> Result<PendingAction, StoreError> {
        let staged = PendingAction {
            id: PendingActionId(Uuid::new_v4().to_string()),
            tool_name: action.tool_name,
            arguments: action.arguments,
            description: action.description,
            requested_by: action.requested_by,
            status: PendingStatus::Pending,
            created_at: Utc::now(),
            confirmed_by: None,
            confirmed_at: None,
            result: None,
        };
        lock(&self.actions).insert(staged.id.clone(), staged.clone());
        Ok(staged)
    }

    async fn get(&self, id: &PendingActionId) -> Result<Option<PendingAction>, StoreError> {
        Ok(lock(&self.actions).get(id).cloned())
    }

    async fn list_pending(&self, requested_by: &str) -> Result<Vec<PendingAction>, StoreError> {
        let mut pending: Vec<PendingAction> = lock(&self.actions)
            .values()
            .filter(|action| {
                action.requested_by == requested_by && action.status == PendingStatus::Pending
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pending)
    }

    async fn transition(
        &self,
        id: &PendingActionId,
        expected: PendingStatus,
        next: PendingStatus,
        confirmed_by: Option<&str>,
        result: Option<&Value>,
    ) -> Result<bool, StoreError> {
        let mut actions = lock(&self.actions);
        let Some(action) = actions.get_mut(id) else {
            return Ok(false);
        };
        if action.status != expected {
            return Ok(false);
        }

        action.status = next;
        if let Some(user) = confirmed_by {
            action.confirmed_by = Some(user.to_string());
            action.confirmed_at = Some(Utc::now());
        }
        if let Some(value) = result {
            action.result = Some(value.clone());
        }
        Ok(true)
    }
}

#[derive(Default)]
struct RecordState {
    projects: Vec<ProjectRef>,
    work_orders: Vec<(i64, i64)>,
    email_assignments: Vec<(i64, i64)>,
}

#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    state: Arc<Mutex<RecordState>>,
}

impl InMemoryRecordStore {
    pub fn projects(&self) -> Vec<ProjectRef> {
        lock(&self.state).projects.clone()
    }

    pub fn email_assignments(&self) -> Vec<(i64, i64)> {
        lock(&self.state).email_assignments.clone()
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_project(
        &self,
        _name: &str,
        _customer_id: Option<i64>,
        _phase: &str,
        _notes: &str,
    ) -> Result<ProjectRef, StoreError> {
        let mut state = lock(&self.state);
        let id = state.projects.len() as i64 + 1;
        let year = Utc::now().format("%Y");
        let project = ProjectRef { id, code: format!("PRJ-{year}-{id:03}") };
        state.projects.push(project.clone());
        Ok(project)
    }

    async fn update_project(
        &self,
        project_id: i64,
        changes: &Map<String, Value>,
    ) -> Result<Vec<String>, StoreError> {
        let state = lock(&self.state);
        if !state.projects.iter().any(|project| project.id == project_id) {
            return Err(StoreError::NotFound(format!("project {project_id}")));
        }
        Ok(changes.keys().map(|key| format!("{key} updated")).collect())
    }

    async fn create_work_order(
        &self,
        project_id: i64,
        _article: Option<String>,
        _quantity: i64,
    ) -> Result<i64, StoreError> {
        let mut state = lock(&self.state);
        if !state.projects.iter().any(|project| project.id == project_id) {
            return Err(StoreError::NotFound(format!("project {project_id}")));
        }
        let id = state.work_orders.len() as i64 + 1;
        state.work_orders.push((id, project_id));
        Ok(id)
    }

    async fn assign_email_to_project(
        &self,
        email_id: i64,
        project_id: i64,
    ) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if !state.projects.iter().any(|project| project.id == project_id) {
            return Err(StoreError::NotFound(format!("project {project_id}")));
        }
        state.email_assignments.push((email_id, project_id));
        Ok(())
    }
}
