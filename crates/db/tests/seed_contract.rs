use opsdesk_core::safety::prepare_read_statement;
use opsdesk_core::store::ReadOnlyStore;
use opsdesk_db::{
    connect_with_settings, fixtures, migrations, SqlReadOnlyStore,
};
use serde_json::json;

async fn seeded_pool() -> opsdesk_db::DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    pool
}

#[tokio::test]
async fn seed_dataset_matches_its_summary() {
    let pool = seeded_pool().await;
    let summary = fixtures::seed_demo_dataset(&pool).await.expect("seed");
    assert!(fixtures::verify_seed(&pool, &summary).await.expect("verify"));
}

#[tokio::test]
async fn seeding_twice_fails_on_unique_codes() {
    let pool = seeded_pool().await;
    fixtures::seed_demo_dataset(&pool).await.expect("first seed");
    assert!(fixtures::seed_demo_dataset(&pool).await.is_err());
}

#[tokio::test]
async fn validated_read_statements_run_against_seeded_data() {
    let pool = seeded_pool().await;
    fixtures::seed_demo_dataset(&pool).await.expect("seed");
    let store = SqlReadOnlyStore::new(pool);

    let statement = prepare_read_statement(
        "SELECT name, city FROM partners WHERE kind = 'Customer' ORDER BY name",
        100,
    )
    .expect("statement should pass validation");

    let rows = store.query(&statement, &[]).await.expect("query");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], json!("Alpina d.o.o."));
    assert_eq!(rows[1]["city"], json!("Graz"));
}
