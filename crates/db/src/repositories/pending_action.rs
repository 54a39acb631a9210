use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row as _;
use uuid::Uuid;

use opsdesk_core::domain::action::{
    NewPendingAction, PendingAction, PendingActionId, PendingStatus,
};
use opsdesk_core::store::{PendingActionStore, StoreError};

use super::{db_error, decode_error};
use crate::DbPool;

pub struct SqlPendingActionStore {
    pool: DbPool,
}

impl SqlPendingActionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PendingActionStore for SqlPendingActionStore {
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

        let arguments_json = serde_json::to_string(&staged.arguments)
            .map_err(|err| decode_error(err.to_string()))?;

        sqlx::query(
            "INSERT INTO pending_actions (
                id, tool_name, arguments, description, requested_by,
                status, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&staged.id.0)
        .bind(&staged.tool_name)
        .bind(&arguments_json)
        .bind(&staged.description)
        .bind(&staged.requested_by)
        .bind(staged.status.as_str())
        .bind(staged.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(staged)
    }

    async fn get(&self, id: &PendingActionId) -> Result<Option<PendingAction>, StoreError> {
        let row = sqlx::query(
            "SELECT id, tool_name, arguments, description, requested_by,
                    status, created_at, confirmed_by, confirmed_at, result
             FROM pending_actions
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(action_from_row).transpose()
    }

    async fn list_pending(&self, requested_by: &str) -> Result<Vec<PendingAction>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, tool_name, arguments, description, requested_by,
                    status, created_at, confirmed_by, confirmed_at, result
             FROM pending_actions
             WHERE requested_by = ? AND status = 'pending'
             ORDER BY created_at DESC",
        )
        .bind(requested_by)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(action_from_row).collect()
    }

    async fn transition(
        &self,
        id: &PendingActionId,
        expected: PendingStatus,
        next: PendingStatus,
        confirmed_by: Option<&str>,
        result: Option<&Value>,
    ) -> Result<bool, StoreError> {
        let confirmed_at = confirmed_by.map(|_| Utc::now().to_rfc3339());
        let result_json = result
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| decode_error(err.to_string()))?;

        let outcome = sqlx::query(
            "UPDATE pending_actions
             SET status = ?,
                 confirmed_by = COALESCE(?, confirmed_by),
                 confirmed_at = COALESCE(?, confirmed_at),
                 result = COALESCE(?, result)
             WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(confirmed_by)
        .bind(confirmed_at)
        .bind(result_json)
        .bind(&id.0)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(outcome.rows_affected() == 1)
    }
}

fn action_from_row(row: SqliteRow) -> Result<PendingAction, StoreError> {
    let arguments_json: String = row.try_get("arguments").map_err(db_error)?;
    let arguments = serde_json::from_str(&arguments_json)
        .map_err(|err| decode_error(format!("invalid arguments json: {err}")))?;

    let status_raw: String = row.try_get("status").map_err(db_error)?;
    let status = PendingStatus::parse(&status_raw)
        .ok_or_else(|| decode_error(format!("unknown status `{status_raw}`")))?;

    let result: Option<Value> = row
        .try_get::<Option<String>, _>("result")
        .map_err(db_error)?
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|err| decode_error(format!("invalid result json: {err}")))
        })
        .transpose()?;

    Ok(PendingAction {
        id: PendingActionId(row.try_get("id").map_err(db_error)?),
        tool_name: row.try_get("tool_name").map_err(db_error)?,
        arguments,
        description: row.try_get("description").map_err(db_error)?,
        requested_by: row.try_get("requested_by").map_err(db_error)?,
        status,
        created_at: parse_timestamp(&row, "created_at")?,
        confirmed_by: row.try_get("confirmed_by").map_err(db_error)?,
        confirmed_at: optional_timestamp(&row, "confirmed_at")?,
        result,
    })
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = row.try_get(column).map_err(db_error)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| decode_error(format!("invalid {column} timestamp: {err}")))
}

fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw: Option<String> = row.try_get(column).map_err(db_error)?;
    raw.map(|value| {
        DateTime::parse_from_rfc3339(&value)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|err| decode_error(format!("invalid {column} timestamp: {err}")))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use opsdesk_core::domain::action::{NewPendingAction, PendingStatus};
    use opsdesk_core::store::PendingActionStore;

    use super::SqlPendingActionStore;
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqlPendingActionStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlPendingActionStore::new(pool)
    }

    fn new_action(requested_by: &str) -> NewPendingAction {
        let mut arguments = Map::new();
        arguments.insert("name".to_string(), json!("Hall renovation"));
        NewPendingAction {
            tool_name: "create_project".to_string(),
            arguments,
            description: "Create project: Hall renovation".to_string(),
            requested_by: requested_by.to_string(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = store().await;
        let staged = store.create(new_action("marta")).await.expect("create");

        let loaded = store.get(&staged.id).await.expect("get").expect("present");
        assert_eq!(loaded, staged);
        assert_eq!(loaded.status, PendingStatus::Pending);
    }

    #[tokio::test]
    async fn list_pending_is_scoped_to_requester() {
        let store = store().await;
        store.create(new_action("marta")).await.expect("create");
        store.create(new_action("bojan")).await.expect("create");

        let mine = store.list_pending("marta").await.expect("list");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].requested_by, "marta");
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = store().await;
        let staged = store.create(new_action("marta")).await.expect("create");

        let won = store
            .transition(
                &staged.id,
                PendingStatus::Pending,
                PendingStatus::Confirmed,
                Some("marta"),
                None,
            )
            .await
            .expect("transition");
        assert!(won);

        // A second confirm attempt loses: status is no longer pending.
        let lost = store
            .transition(
                &staged.id,
                PendingStatus::Pending,
                PendingStatus::Confirmed,
                Some("bojan"),
                None,
            )
            .await
            .expect("transition");
        assert!(!lost);

        let loaded = store.get(&staged.id).await.expect("get").expect("present");
        assert_eq!(loaded.status, PendingStatus::Confirmed);
        assert_eq!(loaded.confirmed_by.as_deref(), Some("marta"));
        assert!(loaded.confirmed_at.is_some());
    }

    #[tokio::test]
    async fn concurrent_transitions_have_a_single_winner() {
        let store = store().await;
        let staged = store.create(new_action("marta")).await.expect("create");

        let (first, second) = tokio::join!(
            store.transition(
                &staged.id,
                PendingStatus::Pending,
                PendingStatus::Confirmed,
                Some("marta"),
                None,
            ),
            store.transition(
                &staged.id,
                PendingStatus::Pending,
                PendingStatus::Confirmed,
                Some("marta"),
                None,
            ),
        );

        let wins = [first.expect("transition"), second.expect("transition")];
        assert_eq!(wins.iter().filter(|won| **won).count(), 1);

        let loaded = store.get(&staged.id).await.expect("get").expect("present");
        assert_eq!(loaded.status, PendingStatus::Confirmed);
    }

    #[tokio::test]
    async fn transition_records_result_payload() {
        let store = store().await;
        let staged = store.create(new_action("marta")).await.expect("create");

        store
            .transition(
                &staged.id,
                PendingStatus::Pending,
                PendingStatus::Confirmed,
                Some("marta"),
                None,
            )
            .await
            .expect("confirm");
        store
            .transition(
                &staged.id,
                PendingStatus::Confirmed,
                PendingStatus::Failed,
                None,
                Some(&json!({"error": "project name already taken"})),
            )
            .await
            .expect("fail");

        let loaded = store.get(&staged.id).await.expect("get").expect("present");
        assert_eq!(loaded.status, PendingStatus::Failed);
        assert_eq!(loaded.result, Some(json!({"error": "project name already taken"})));
    }
}
