//! Storage layer: connection pools, decode helpers, and the generic
//! typed bulk-insert utility.
//!
//! Monetary values are stored as TEXT and carried as `rust_decimal`
//! in Rust; all arithmetic happens in `Decimal`, never in SQL.

use rust_decimal::Decimal;
use sqlx::query_builder::Separated;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use crate::types::PipelineError;

/// Open a pool against an existing database.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?;
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

/// Open a pool against the audit datastore, creating the file when absent.
pub async fn connect_create(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

// ---------------------------------------------------------------------------
// Decode helpers
// ---------------------------------------------------------------------------

/// Read a TEXT column holding an exact decimal amount.
pub fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, PipelineError> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(raw.trim()).map_err(|_| PipelineError::Decode {
        column: column.to_string(),
        value: raw,
    })
}

/// Read a nullable TEXT column holding an exact decimal amount.
pub fn opt_decimal_column(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, PipelineError> {
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        None => Ok(None),
        Some(s) => Decimal::from_str(s.trim())
            .map(Some)
            .map_err(|_| PipelineError::Decode {
                column: column.to_string(),
                value: s,
            }),
    }
}

/// Read a TEXT column holding a UUID.
pub fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid, PipelineError> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|_| PipelineError::Decode {
        column: column.to_string(),
        value: raw,
    })
}

// ---------------------------------------------------------------------------
// Typed bulk insert
// ---------------------------------------------------------------------------

/// A record that knows how to write itself into a run-scoped table.
///
/// Implementors declare the destination table, the column list, and the
/// typed binds in column order. `bulk_insert` prepends the `run_id` tag
/// to every row.
pub trait BulkRow {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    /// Push one bind per declared column, in order.
    fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>);
}

/// Batched multi-row INSERT of run-tagged records.
///
/// Returns the number of rows written. Statements are chunked so the
/// bind count stays well under the SQLite variable limit.
pub async fn bulk_insert<R: BulkRow>(
    tx: &mut Transaction<'_, Sqlite>,
    run_id: Uuid,
    rows: &[R],
    batch_size: usize,
) -> Result<u64, sqlx::Error> {
    if rows.is_empty() {
        return Ok(0);
    }

    let prefix = format!(
        "INSERT INTO {} (run_id, {}) ",
        R::TABLE,
        R::COLUMNS.join(", ")
    );

    let mut inserted = 0u64;
    for chunk in rows.chunks(batch_size.max(1)) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(prefix.as_str());
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(run_id.to_string());
            row.bind(&mut b);
        });
        let result = builder.build().execute(&mut **tx).await?;
        inserted += result.rows_affected();
    }

    Ok(inserted)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct TestRow {
        name: String,
        amount: Decimal,
        count: i64,
    }

    impl BulkRow for TestRow {
        const TABLE: &'static str = "bulk_test";
        const COLUMNS: &'static [&'static str] = &["name", "amount", "count"];

        fn bind(&self, b: &mut Separated<'_, '_, Sqlite, &'static str>) {
            b.push_bind(self.name.clone());
            b.push_bind(self.amount.to_string());
            b.push_bind(self.count);
        }
    }

    async fn pool_with_table() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE bulk_test (
                run_id TEXT NOT NULL,
                name TEXT NOT NULL,
                amount TEXT NOT NULL,
                count INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_bulk_insert_tags_run_id() {
        let pool = pool_with_table().await;
        let run_id = Uuid::new_v4();
        let rows = vec![
            TestRow {
                name: "a".to_string(),
                amount: dec!(1.50),
                count: 1,
            },
            TestRow {
                name: "b".to_string(),
                amount: dec!(2.25),
                count: 2,
            },
            TestRow {
                name: "c".to_string(),
                amount: dec!(3.00),
                count: 3,
            },
        ];

        let mut tx = pool.begin().await.unwrap();
        // batch_size 2 forces two INSERT statements
        let written = bulk_insert(&mut tx, run_id, &rows, 2).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(written, 3);

        let tagged: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM bulk_test WHERE run_id = ?1")
                .bind(run_id.to_string())
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(tagged, 3);
    }

    #[tokio::test]
    async fn test_bulk_insert_empty_is_noop() {
        let pool = pool_with_table().await;
        let mut tx = pool.begin().await.unwrap();
        let written = bulk_insert::<TestRow>(&mut tx, Uuid::new_v4(), &[], 10)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn test_decimal_column_roundtrip() {
        let pool = pool_with_table().await;
        let run_id = Uuid::new_v4();
        let rows = vec![TestRow {
            name: "x".to_string(),
            amount: dec!(998.50),
            count: 0,
        }];
        let mut tx = pool.begin().await.unwrap();
        bulk_insert(&mut tx, run_id, &rows, 10).await.unwrap();
        tx.commit().await.unwrap();

        let row = sqlx::query("SELECT run_id, amount FROM bulk_test")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(decimal_column(&row, "amount").unwrap(), dec!(998.50));
        assert_eq!(uuid_column(&row, "run_id").unwrap(), run_id);
    }

    #[tokio::test]
    async fn test_decimal_column_rejects_garbage() {
        let pool = pool_with_table().await;
        sqlx::query("INSERT INTO bulk_test (run_id, name, amount, count) VALUES ('r', 'n', 'not-a-number', 0)")
            .execute(&pool)
            .await
            .unwrap();
        let row = sqlx::query("SELECT amount FROM bulk_test")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(matches!(
            decimal_column(&row, "amount"),
            Err(PipelineError::Decode { .. })
        ));
    }
}
