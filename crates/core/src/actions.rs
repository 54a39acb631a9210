//! Pure state machine for the pending-action lifecycle.
//!
//! Transitions: `Pending -> Confirmed | Rejected`, `Confirmed -> Failed` (or a
//! recorded result). An action never re-enters `Pending`; every other attempt
//! is a precondition error and leaves the action untouched. Persistence-level
//! serialization of concurrent confirms lives in the store's compare-and-set;
//! this module owns the rules.

use chrono::Utc;
use serde_json::Value;

use crate::domain::action::{PendingAction, PendingStatus};
use crate::errors::PreconditionError;

/// Validate a confirm attempt without mutating the action.
///
/// Fails when the action is not `Pending` or when `confirmed_by` is not the
/// original requester (ownership check).
pub fn check_confirmable(
    action: &PendingAction,
    confirmed_by: &str,
) -> Result<(), PreconditionError> {
    if action.status != PendingStatus::Pending {
        return Err(PreconditionError::NotPending {
            id: action.id.clone(),
            status: action.status,
        });
    }
    if action.requested_by != confirmed_by {
        return Err(PreconditionError::NotOwner {
            id: action.id.clone(),
            owner: action.requested_by.clone(),
            caller: confirmed_by.to_string(),
        });
    }
    Ok(())
}

/// Apply the `Pending -> Confirmed` transition.
pub fn confirm(
    mut action: PendingAction,
    confirmed_by: &str,
) -> Result<PendingAction, PreconditionError> {
    check_confirmable(&action, confirmed_by)?;
    action.status = PendingStatus::Confirmed;
    action.confirmed_by = Some(confirmed_by.to_string());
    action.confirmed_at = Some(Utc::now());
    Ok(action)
}

/// Apply the `Pending -> Rejected` transition. Terminal, no side effect.
pub fn reject(mut action: PendingAction) -> Result<PendingAction, PreconditionError> {
    if action.status != PendingStatus::Pending {
        return Err(PreconditionError::NotPending {
            id: action.id.clone(),
            status: action.status,
        });
    }
    action.status = PendingStatus::Rejected;
    Ok(action)
}

/// Record the outcome of a confirmed execution.
///
/// A successful run keeps `Confirmed` and stores the result; a failed run
/// moves to `Failed` with the error recorded.
pub fn record_outcome(
    mut action: PendingAction,
    outcome: Result<Value, String>,
) -> Result<PendingAction, PreconditionError> {
    if action.status != PendingStatus::Confirmed {
        return Err(PreconditionError::NotPending {
            id: action.id.clone(),
            status: action.status,
        });
    }
    match outcome {
        Ok(result) => action.result = Some(result),
        Err(error) => {
            action.status = PendingStatus::Failed;
            action.result = Some(serde_json::json!({ "error": error }));
        }
    }
    Ok(action)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{json, Map};

    use super::{check_confirmable, confirm, record_outcome, reject};
    use crate::domain::action::{PendingAction, PendingActionId, PendingStatus};
    use crate::errors::PreconditionError;

    fn pending_fixture() -> PendingAction {
        PendingAction {
            id: PendingActionId("act-1".to_string()),
            tool_name: "create_project".to_string(),
            arguments: Map::new(),
            description: "Create project: Acme Widget".to_string(),
            requested_by: "ana".to_string(),
            status: PendingStatus::Pending,
            created_at: Utc::now(),
            confirmed_by: None,
            confirmed_at: None,
            result: None,
        }
    }

    #[test]
    fn confirm_by_requester_succeeds() {
        let confirmed = confirm(pending_fixture(), "ana").unwrap();
        assert_eq!(confirmed.status, PendingStatus::Confirmed);
        assert_eq!(confirmed.confirmed_by.as_deref(), Some("ana"));
        assert!(confirmed.confirmed_at.is_some());
    }

    #[test]
    fn confirm_by_other_user_is_ownership_violation() {
        let err = confirm(pending_fixture(), "borut").unwrap_err();
        assert!(matches!(err, PreconditionError::NotOwner { .. }));
    }

    #[test]
    fn confirm_after_rejection_is_precondition_error() {
        let rejected = reject(pending_fixture()).unwrap();
        assert_eq!(rejected.status, PendingStatus::Rejected);
        let err = check_confirmable(&rejected, "ana").unwrap_err();
        assert!(matches!(
            err,
            PreconditionError::NotPending { status: PendingStatus::Rejected, .. }
        ));
    }

    #[test]
    fn second_reject_fails_and_state_is_unchanged() {
        let rejected = reject(pending_fixture()).unwrap();
        let err = reject(rejected.clone()).unwrap_err();
        assert!(matches!(err, PreconditionError::NotPending { .. }));
        assert_eq!(rejected.status, PendingStatus::Rejected);
    }

    #[test]
    fn failed_execution_moves_to_failed_with_error_recorded() {
        let confirmed = confirm(pending_fixture(), "ana").unwrap();
        let failed =
            record_outcome(confirmed, Err("constraint violation".to_string())).unwrap();
        assert_eq!(failed.status, PendingStatus::Failed);
        assert_eq!(failed.result, Some(json!({"error": "constraint violation"})));
    }

    #[test]
    fn successful_execution_records_result() {
        let confirmed = confirm(pending_fixture(), "ana").unwrap();
        let done = record_outcome(confirmed, Ok(json!({"id": 42}))).unwrap();
        assert_eq!(done.status, PendingStatus::Confirmed);
        assert_eq!(done.result, Some(json!({"id": 42})));
    }
}
