//! Confirmation workflow for staged write actions.
//!
//! The gateway stages writes; a human confirms or rejects them here. Confirm
//! is serialized per action through the store's compare-and-set transition,
//! so at most one of two concurrent confirms executes the write. Every
//! transition emits an audit event.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use opsdesk_core::actions;
use opsdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use opsdesk_core::domain::action::{PendingAction, PendingActionId, PendingStatus};
use opsdesk_core::errors::PreconditionError;
use opsdesk_core::store::{PendingActionStore, StoreError};

use crate::gateway::ToolGateway;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ActionWorkflow {
    store: Arc<dyn PendingActionStore>,
    gateway: Arc<ToolGateway>,
    audit: Arc<dyn AuditSink>,
}

impl ActionWorkflow {
    pub fn new(
        store: Arc<dyn PendingActionStore>,
        gateway: Arc<ToolGateway>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { store, gateway, audit }
    }

    /// Confirm a staged action and execute its write.
    ///
    /// Preconditions: the action exists, is still pending, and `confirmed_by`
    /// is the original requester. The pending -> confirmed transition is a
    /// compare-and-set; a losing concurrent confirm surfaces as a
    /// precondition error, never a double execution.
    pub async fn confirm(
        &self,
        id: &PendingActionId,
        confirmed_by: &str,
    ) -> Result<PendingAction, WorkflowError> {
        let correlation_id = Uuid::new_v4().to_string();
        let action = self.fetch(id).await?;
        actions::check_confirmable(&action, confirmed_by)?;

        let won = self
            .store
            .transition(id, PendingStatus::Pending, PendingStatus::Confirmed, Some(confirmed_by), None)
            .await?;
        if !won {
            // Lost the race: report the status the winner left behind.
            let current = self.fetch(id).await?;
            return Err(PreconditionError::NotPending { id: id.clone(), status: current.status }
                .into());
        }

        self.audit.emit(
            AuditEvent::new(
                Some(id.clone()),
                None,
                correlation_id.clone(),
                "approval.confirmed",
                AuditCategory::Approval,
                confirmed_by,
                AuditOutcome::Success,
            )
            .with_metadata("tool", action.tool_name.clone()),
        );
        info!(event_name = "workflow.confirmed", action_id = %id, confirmed_by);

        let confirmed = self.fetch(id).await?;
        let execution = self.gateway.execute_confirmed(&confirmed).await;

        let outcome = if execution.success {
            let result = execution.data.clone().unwrap_or(json!({}));
            self.store
                .transition(
                    id,
                    PendingStatus::Confirmed,
                    PendingStatus::Confirmed,
                    None,
                    Some(&result),
                )
                .await?;
            self.audit.emit(
                AuditEvent::new(
                    Some(id.clone()),
                    None,
                    correlation_id,
                    "approval.executed",
                    AuditCategory::Approval,
                    confirmed_by,
                    AuditOutcome::Success,
                )
                .with_metadata("tool", confirmed.tool_name.clone()),
            );
            Ok(result)
        } else {
            let error = execution.error.clone().unwrap_or_else(|| "execution failed".to_string());
            self.store
                .transition(
                    id,
                    PendingStatus::Confirmed,
                    PendingStatus::Failed,
                    None,
                    Some(&json!({ "error": error.clone() })),
                )
                .await?;
            warn!(event_name = "workflow.execution_failed", action_id = %id, error = %error);
            self.audit.emit(
                AuditEvent::new(
                    Some(id.clone()),
                    None,
                    correlation_id,
                    "approval.execution_failed",
                    AuditCategory::Approval,
                    confirmed_by,
                    AuditOutcome::Failed,
                )
                .with_metadata("error", error.clone()),
            );
            Err(error)
        };

        Ok(actions::record_outcome(confirmed, outcome)?)
    }

    /// Reject a staged action. Terminal, no side effect on the database.
    pub async fn reject(
        &self,
        id: &PendingActionId,
        requested_by: &str,
    ) -> Result<PendingAction, WorkflowError> {
        let action = self.fetch(id).await?;
        actions::check_confirmable(&action, requested_by)?;

        let won = self
            .store
            .transition(id, PendingStatus::Pending, PendingStatus::Rejected, Some(requested_by), None)
            .await?;
        if !won {
            let current = self.fetch(id).await?;
            return Err(PreconditionError::NotPending { id: id.clone(), status: current.status }
                .into());
        }

        self.audit.emit(
            AuditEvent::new(
                Some(id.clone()),
                None,
                Uuid::new_v4().to_string(),
                "approval.rejected",
                AuditCategory::Approval,
                requested_by,
                AuditOutcome::Rejected,
            )
            .with_metadata("tool", action.tool_name.clone()),
        );
        info!(event_name = "workflow.rejected", action_id = %id, requested_by);

        Ok(actions::reject(action)?)
    }

    /// Staged actions still awaiting a decision from this requester.
    pub async fn list_pending(
        &self,
        requested_by: &str,
    ) -> Result<Vec<PendingAction>, WorkflowError> {
        Ok(self.store.list_pending(requested_by).await?)
    }

    async fn fetch(&self, id: &PendingActionId) -> Result<PendingAction, WorkflowError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PreconditionError::ActionNotFound { id: id.clone() }.into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use opsdesk_core::audit::InMemoryAuditSink;
    use opsdesk_core::config::SandboxConfig;
    use opsdesk_core::domain::action::{PendingActionId, PendingStatus};
    use opsdesk_core::domain::conversation::ToolCall;
    use opsdesk_db::repositories::memory::{
        InMemoryPendingActionStore, InMemoryReadOnlyStore, InMemoryRecordStore,
    };

    use super::{ActionWorkflow, WorkflowError};
    use crate::gateway::ToolGateway;
    use crate::sandbox::ScriptSandbox;
    use opsdesk_core::errors::PreconditionError;

    fn harness() -> (ActionWorkflow, Arc<ToolGateway>, Arc<InMemoryAuditSink>) {
        let pending = Arc::new(InMemoryPendingActionStore::default());
        let gateway = Arc::new(ToolGateway::new(
            Arc::new(InMemoryReadOnlyStore::default()),
            Arc::clone(&pending) as Arc<dyn opsdesk_core::store::PendingActionStore>,
            Arc::new(InMemoryRecordStore::default()),
            None,
            ScriptSandbox::new(SandboxConfig {
                timeout_secs: 2,
                max_operations: 1_000_000,
                max_result_bytes: 50 * 1024,
            }),
        ));
        let audit = Arc::new(InMemoryAuditSink::default());
        let workflow = ActionWorkflow::new(
            pending,
            Arc::clone(&gateway),
            Arc::clone(&audit) as Arc<dyn opsdesk_core::audit::AuditSink>,
        );
        (workflow, gateway, audit)
    }

    async fn stage_create_project(gateway: &ToolGateway, requested_by: &str) -> PendingActionId {
        let call = ToolCall::from_raw_arguments("create_project", json!({"name": "Hall B"}));
        let result = gateway.invoke(&call, requested_by).await;
        result.pending_action.expect("staged action").id
    }

    #[tokio::test]
    async fn confirm_executes_and_records_result() {
        let (workflow, gateway, audit) = harness();
        let id = stage_create_project(&gateway, "marta").await;

        let done = workflow.confirm(&id, "marta").await.unwrap();
        assert_eq!(done.status, PendingStatus::Confirmed);
        let result = done.result.expect("execution result");
        assert!(result.get("project_id").is_some());

        let events = audit.events();
        assert!(events.iter().any(|e| e.event_type == "approval.confirmed"));
        assert!(events.iter().any(|e| e.event_type == "approval.executed"));
    }

    #[tokio::test]
    async fn confirm_by_wrong_user_is_rejected_before_any_transition() {
        let (workflow, gateway, _) = harness();
        let id = stage_create_project(&gateway, "marta").await;

        let err = workflow.confirm(&id, "bojan").await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Precondition(PreconditionError::NotOwner { .. })
        ));

        let still_pending = workflow.list_pending("marta").await.unwrap();
        assert_eq!(still_pending.len(), 1);
    }

    #[tokio::test]
    async fn racing_confirms_execute_the_write_exactly_once() {
        let pending = Arc::new(InMemoryPendingActionStore::default());
        let records = Arc::new(InMemoryRecordStore::default());
        let gateway = Arc::new(ToolGateway::new(
            Arc::new(InMemoryReadOnlyStore::default()),
            Arc::clone(&pending) as Arc<dyn opsdesk_core::store::PendingActionStore>,
            Arc::clone(&records) as Arc<dyn opsdesk_core::store::RecordStore>,
            None,
            ScriptSandbox::new(SandboxConfig {
                timeout_secs: 2,
                max_operations: 1_000_000,
                max_result_bytes: 50 * 1024,
            }),
        ));
        let workflow = ActionWorkflow::new(
            pending,
            Arc::clone(&gateway),
            Arc::new(InMemoryAuditSink::default()),
        );
        let id = stage_create_project(&gateway, "marta").await;

        let (first, second) = tokio::join!(
            workflow.confirm(&id, "marta"),
            workflow.confirm(&id, "marta"),
        );

        let outcomes = [first, second];
        let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(outcomes.iter().any(|outcome| matches!(
            outcome,
            Err(WorkflowError::Precondition(PreconditionError::NotPending { .. }))
        )));
        assert_eq!(records.projects().len(), 1);
    }

    #[tokio::test]
    async fn reject_is_terminal_and_second_reject_fails() {
        let (workflow, gateway, audit) = harness();
        let id = stage_create_project(&gateway, "marta").await;

        let rejected = workflow.reject(&id, "marta").await.unwrap();
        assert_eq!(rejected.status, PendingStatus::Rejected);

        let err = workflow.reject(&id, "marta").await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Precondition(PreconditionError::NotPending { .. })
        ));
        assert!(audit.events().iter().any(|e| e.event_type == "approval.rejected"));
    }

    #[tokio::test]
    async fn confirm_of_missing_action_is_not_found() {
        let (workflow, _, _) = harness();
        let err = workflow
            .confirm(&PendingActionId("no-such-action".to_string()), "marta")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Precondition(PreconditionError::ActionNotFound { .. })
        ));
    }
}
