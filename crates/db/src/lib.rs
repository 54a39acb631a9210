pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{seed_demo_dataset, verify_seed, SeedSummary};
pub use repositories::{
    InMemoryPendingActionStore, InMemoryReadOnlyStore, InMemoryRecordStore, SqlPendingActionStore,
    SqlReadOnlyStore, SqlRecordStore,
};
