pub mod actions;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod safety;
pub mod store;
pub mod tools;

pub use actions::{check_confirmable, confirm, record_outcome, reject};
pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use config::{
    AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, SandboxConfig,
};
pub use domain::action::{NewPendingAction, PendingAction, PendingActionId, PendingStatus};
pub use domain::conversation::{ConversationTurn, Role, ToolCall};
pub use domain::tool::{ToolResult, TRUNCATED_ROW_COUNT};
pub use errors::{PreconditionError, ResourceError, SafetyViolation, TransportError};
pub use safety::{
    check_script, prepare_read_statement, validate_where_clause, ANALYSIS_ROW_CEILING,
    READ_ROW_CEILING,
};
pub use store::{
    PendingActionStore, ProjectRef, QueryParam, ReadOnlyStore, RecordStore, Row, StoreError,
};
pub use tools::{
    catalogue, countable_table, write_description, ToolCategory, ToolName, ToolSpec,
    COUNTABLE_TABLES,
};
