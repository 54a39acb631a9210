use chrono::{Datelike, Utc};
use serde_json::{Map, Value};
use sqlx::Row as _;

use opsdesk_core::store::{ProjectRef, RecordStore, StoreError};

use super::{db_error, decode_error};
use crate::DbPool;

/// Fields `update_project` will apply; anything else in the change map is
/// ignored rather than rejected, so the approver sees exactly what changed.
const UPDATABLE_FIELDS: &[&str] = &["phase", "status", "notes"];

const TIMELINE_ACTOR: &str = "assistant";

/// Executes confirmed mutations. The only writer for business tables.
pub struct SqlRecordStore {
    pool: DbPool,
}

impl SqlRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn next_project_code(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ) -> Result<String, StoreError> {
        let year = Utc::now().year();
        let prefix = format!("PRJ-{year}-%");
        let count = sqlx::query("SELECT COUNT(*) AS n FROM projects WHERE code LIKE ?")
            .bind(&prefix)
            .fetch_one(&mut **tx)
            .await
            .map_err(db_error)?
            .get::<i64, _>("n");
        Ok(format!("PRJ-{year}-{:03}", count + 1))
    }
}

#[async_trait::async_trait]
impl RecordStore for SqlRecordStore {
    async fn create_project(
        &self,
        name: &str,
        customer_id: Option<i64>,
        phase: &str,
        notes: &str,
    ) -> Result<ProjectRef, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let code = self.next_project_code(&mut tx).await?;
        let outcome = sqlx::query(
            "INSERT INTO projects (code, name, customer_id, phase, notes)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&code)
        .bind(name)
        .bind(customer_id)
        .bind(phase)
        .bind(notes)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let project_id = outcome.last_insert_rowid();
        sqlx::query("INSERT INTO project_timeline (project_id, entry, actor) VALUES (?, ?, ?)")
            .bind(project_id)
            .bind(format!("Project created as {code}"))
            .bind(TIMELINE_ACTOR)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(ProjectRef { id: project_id, code })
    }

    async fn update_project(
        &self,
        project_id: i64,
        changes: &Map<String, Value>,
    ) -> Result<Vec<String>, StoreError> {
        let mut applied = Vec::new();
        let mut assignments = Vec::new();
        let mut values = Vec::new();

        for field in UPDATABLE_FIELDS {
            if let Some(value) = changes.get(*field).and_then(Value::as_str) {
                assignments.push(format!("{field} = ?"));
                values.push(value.to_string());
                applied.push(format!("{field} -> {value}"));
            }
        }

        if assignments.is_empty() {
            return Err(decode_error(
                "update_project requires at least one of phase, status, notes",
            ));
        }

        let statement = format!(
            "UPDATE projects SET {}, updated_at = datetime('now') WHERE id = ?",
            assignments.join(", ")
        );

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut query = sqlx::query(&statement);
        for value in &values {
            query = query.bind(value);
        }
        let outcome = query.bind(project_id).execute(&mut *tx).await.map_err(db_error)?;

        if outcome.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("project {project_id}")));
        }

        sqlx::query("INSERT INTO project_timeline (project_id, entry, actor) VALUES (?, ?, ?)")
            .bind(project_id)
            .bind(format!("Project updated: {}", applied.join(", ")))
            .bind(TIMELINE_ACTOR)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(applied)
    }

    async fn create_work_order(
        &self,
        project_id: i64,
        article: Option<String>,
        quantity: i64,
    ) -> Result<i64, StoreError> {
        let exists = sqlx::query("SELECT id FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("project {project_id}")));
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let outcome =
            sqlx::query("INSERT INTO work_orders (project_id, article, quantity) VALUES (?, ?, ?)")
                .bind(project_id)
                .bind(article.as_deref())
                .bind(quantity)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

        let work_order_id = outcome.last_insert_rowid();
        sqlx::query("INSERT INTO project_timeline (project_id, entry, actor) VALUES (?, ?, ?)")
            .bind(project_id)
            .bind(format!("Work order #{work_order_id} created (quantity {quantity})"))
            .bind(TIMELINE_ACTOR)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(work_order_id)
    }

    async fn assign_email_to_project(
        &self,
        email_id: i64,
        project_id: i64,
    ) -> Result<(), StoreError> {
        let exists = sqlx::query("SELECT id FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("project {project_id}")));
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let outcome =
            sqlx::query("UPDATE emails SET project_id = ?, status = 'Assigned' WHERE id = ?")
                .bind(project_id)
                .bind(email_id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

        if outcome.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("email {email_id}")));
        }

        sqlx::query("INSERT INTO project_timeline (project_id, entry, actor) VALUES (?, ?, ?)")
            .bind(project_id)
            .bind(format!("Email #{email_id} assigned to project"))
            .bind(TIMELINE_ACTOR)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Utc};
    use serde_json::{json, Map};
    use sqlx::Row as _;

    use opsdesk_core::store::{RecordStore, StoreError};

    use super::SqlRecordStore;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    async fn create_project_generates_sequential_codes() {
        let pool = pool().await;
        let store = SqlRecordStore::new(pool.clone());
        let year = Utc::now().year();

        let first = store.create_project("Hall A", None, "RFQ", "").await.expect("create");
        let second = store.create_project("Hall B", None, "RFQ", "").await.expect("create");

        assert_eq!(first.code, format!("PRJ-{year}-001"));
        assert_eq!(second.code, format!("PRJ-{year}-002"));

        let timeline = sqlx::query("SELECT COUNT(*) AS n FROM project_timeline")
            .fetch_one(&pool)
            .await
            .expect("count")
            .get::<i64, _>("n");
        assert_eq!(timeline, 2);
    }

    #[tokio::test]
    async fn update_project_applies_only_supported_fields() {
        let pool = pool().await;
        let store = SqlRecordStore::new(pool.clone());
        let project = store.create_project("Hall A", None, "RFQ", "").await.expect("create");

        let mut changes = Map::new();
        changes.insert("phase".to_string(), json!("Quote"));
        changes.insert("code".to_string(), json!("PRJ-9999-999"));

        let applied = store.update_project(project.id, &changes).await.expect("update");
        assert_eq!(applied, vec!["phase -> Quote".to_string()]);

        let row = sqlx::query("SELECT code, phase FROM projects WHERE id = ?")
            .bind(project.id)
            .fetch_one(&pool)
            .await
            .expect("fetch");
        assert_eq!(row.get::<String, _>("phase"), "Quote");
        assert_eq!(row.get::<String, _>("code"), project.code, "code must not be editable");
    }

    #[tokio::test]
    async fn update_project_rejects_empty_change_set() {
        let pool = pool().await;
        let store = SqlRecordStore::new(pool);
        let project = store.create_project("Hall A", None, "RFQ", "").await.expect("create");

        let error = store.update_project(project.id, &Map::new()).await.expect_err("must fail");
        assert!(matches!(error, StoreError::Decode(_)));
    }

    #[tokio::test]
    async fn work_order_requires_existing_project() {
        let pool = pool().await;
        let store = SqlRecordStore::new(pool);

        let error =
            store.create_work_order(999, None, 5).await.expect_err("missing project must fail");
        assert!(matches!(error, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn assign_email_marks_it_assigned() {
        let pool = pool().await;
        let store = SqlRecordStore::new(pool.clone());
        let project = store.create_project("Hall A", None, "RFQ", "").await.expect("create");

        sqlx::query("INSERT INTO emails (sender, subject) VALUES ('kupec@example.si', 'RFQ hall')")
            .execute(&pool)
            .await
            .expect("seed email");

        store.assign_email_to_project(1, project.id).await.expect("assign");

        let row = sqlx::query("SELECT status, project_id FROM emails WHERE id = 1")
            .fetch_one(&pool)
            .await
            .expect("fetch");
        assert_eq!(row.get::<String, _>("status"), "Assigned");
        assert_eq!(row.get::<i64, _>("project_id"), project.id);
    }
}
