use opsdesk_core::store::StoreError;

pub mod memory;
pub mod pending_action;
pub mod readonly;
pub mod record;

pub use memory::{InMemoryPendingActionStore, InMemoryReadOnlyStore, InMemoryRecordStore};
pub use pending_action::SqlPendingActionStore;
pub use readonly::SqlReadOnlyStore;
pub use record::SqlRecordStore;

pub(crate) fn db_error(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

pub(crate) fn decode_error(message: impl Into<String>) -> StoreError {
    StoreError::Decode(message.into())
}
