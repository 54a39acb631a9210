use thiserror::Error;

use crate::domain::action::{PendingActionId, PendingStatus};

/// A statement or script was rejected before any execution step.
///
/// Safety rejections are surfaced verbatim to the user: the human confirming
/// or debugging an action needs to know exactly which token was blocked.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SafetyViolation {
    #[error("forbidden operation `{keyword}` is not allowed in a data query")]
    ForbiddenKeyword { keyword: String },
    #[error("only SELECT statements are allowed")]
    NotReadOnly,
    #[error("unsafe WHERE clause: `{token}` is not allowed")]
    UnsafeWhereClause { token: String },
    #[error("script contains a forbidden construct: `{pattern}`")]
    ForbiddenPattern { pattern: String },
    #[error("script imports a forbidden module: `{module}`")]
    ForbiddenModule { module: String },
    #[error("script imports a module outside the allowlist: `{module}` (allowed: {allowed})")]
    ModuleNotAllowed { module: String, allowed: String },
}

/// A state or ownership precondition failed; the action is left unchanged.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("pending action {id} does not exist")]
    ActionNotFound { id: PendingActionId },
    #[error("pending action {id} is {status:?}, not pending")]
    NotPending { id: PendingActionId, status: PendingStatus },
    #[error("pending action {id} belongs to {owner}, not {caller}")]
    NotOwner { id: PendingActionId, owner: String, caller: String },
    #[error("result of {actual} bytes exceeds the {limit} byte ceiling; narrow the analysis")]
    ResultTooLarge { actual: usize, limit: usize },
}

/// A model or database endpoint was unreachable or timed out.
///
/// Recovered locally: the orchestrator maps these onto a fixed user-facing
/// fallback and never exposes the raw text.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("model request timed out after {seconds}s")]
    ModelTimeout { seconds: u64 },
    #[error("model request failed: {0}")]
    Model(String),
    #[error("model returned an unusable response: {0}")]
    MalformedResponse(String),
    #[error("database unavailable: {0}")]
    Database(String),
}

/// Sandbox resource limit hit; the execution context is torn down.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("script exceeded the {seconds}s time limit")]
    ScriptTimeout { seconds: u64 },
    #[error("script exceeded the operation budget")]
    OperationBudget,
}
