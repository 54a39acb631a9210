use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use opsdesk_core::store::{QueryParam, ReadOnlyStore, Row, StoreError};

use super::db_error;
use crate::DbPool;

/// Read-only query surface over the operational database.
///
/// Rows come back as plain JSON maps: integers and reals stay numeric, text
/// is right-trimmed (legacy tables pad with spaces), blobs are hex-encoded,
/// NULL is `null`. One pool acquisition per call.
pub struct SqlReadOnlyStore {
    pool: DbPool,
}

impl SqlReadOnlyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReadOnlyStore for SqlReadOnlyStore {
    async fn query(&self, statement: &str, params: &[QueryParam]) -> Result<Vec<Row>, StoreError> {
        let mut query = sqlx::query(statement);
        for param in params {
            query = match param {
                QueryParam::Int(value) => query.bind(*value),
                QueryParam::Text(value) => query.bind(value.clone()),
            };
        }

        let rows = query.fetch_all(&self.pool).await.map_err(db_error)?;
        rows.iter().map(row_to_map).collect()
    }
}

fn row_to_map(row: &SqliteRow) -> Result<Row, StoreError> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), column_value(row, index)?);
    }
    Ok(map)
}

fn column_value(row: &SqliteRow, index: usize) -> Result<Value, StoreError> {
    let raw = row.try_get_raw(index).map_err(|err| StoreError::Decode(err.to_string()))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let type_name = raw.type_info().name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => {
            Value::from(row.try_get::<i64, _>(index).map_err(decode)?)
        }
        "REAL" => Value::from(row.try_get::<f64, _>(index).map_err(decode)?),
        "BLOB" => {
            let bytes = row.try_get::<Vec<u8>, _>(index).map_err(decode)?;
            let mut hex = String::with_capacity(bytes.len() * 2);
            for byte in &bytes {
                hex.push_str(&format!("{byte:02x}"));
            }
            Value::String(hex)
        }
        _ => {
            let text = row.try_get::<String, _>(index).map_err(decode)?;
            Value::String(text.trim_end().to_string())
        }
    };

    Ok(value)
}

fn decode(err: sqlx::Error) -> StoreError {
    StoreError::Decode(err.to_string())
}

#[cfg(test)]
mod tests {
    use opsdesk_core::store::{QueryParam, ReadOnlyStore};
    use serde_json::json;

    use super::SqlReadOnlyStore;
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqlReadOnlyStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        sqlx::query(
            "INSERT INTO partners (code, name, kind, city) VALUES
                ('P001', 'Alpina d.o.o.   ', 'Customer', 'Kranj'),
                ('P002', 'Metalka', 'Supplier', 'Celje')",
        )
        .execute(&pool)
        .await
        .expect("seed");
        SqlReadOnlyStore::new(pool)
    }

    #[tokio::test]
    async fn rows_come_back_as_plain_json() {
        let store = store().await;
        let rows = store
            .query(
                "SELECT id, name, city FROM partners WHERE code = ?",
                &[QueryParam::from("P001")],
            )
            .await
            .expect("query");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["name"], json!("Alpina d.o.o."), "padding should be trimmed");
        assert_eq!(rows[0]["city"], json!("Kranj"));
    }

    #[tokio::test]
    async fn bound_parameters_are_not_interpolated() {
        let store = store().await;
        let rows = store
            .query(
                "SELECT name FROM partners WHERE name = ?",
                &[QueryParam::from("'; DROP TABLE partners; --")],
            )
            .await
            .expect("query");
        assert!(rows.is_empty());

        let still_there =
            store.query("SELECT COUNT(*) AS n FROM partners", &[]).await.expect("count");
        assert_eq!(still_there[0]["n"], json!(2));
    }
}
