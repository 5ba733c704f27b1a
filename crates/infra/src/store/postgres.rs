//! Postgres-backed transactional store.
//!
//! Parts live in `inventory_stock`, movements in `inventory_movement`. The
//! movement → part foreign key is `DEFERRABLE INITIALLY DEFERRED`, so a rename
//! may update the part row before re-keying its movements inside one
//! transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` |
//! | Database (foreign key violation) | `23503` | `ForeignKeyViolation` |
//! | Database (lock not available) | `55P03` | `LockTimeout` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Connection` |
//! | Other | N/A | `Backend` |
//!
//! ## Sync Boundary
//!
//! The store traits are synchronous. `PostgresStore` owns a small tokio
//! runtime and blocks on it, so it must be used from plain threads (or
//! `spawn_blocking`), never from inside an async task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row};
use tokio::runtime::Runtime;
use tracing::{Span, instrument};

use stockledger_core::{MovementId, PartNo};
use stockledger_inventory::{Movement, MovementType, Part, Quantity};

use super::r#trait::{
    ExecOutcome, LockMode, Query, Record, Statement, StoreError, Transaction, TransactionalStore,
};

const SCHEMA: &str = include_str!("../../migrations/0001_inventory.sql");

/// Postgres-backed store.
///
/// Row locks (`SELECT ... FOR UPDATE`) serialize concurrent movements on the
/// same part; movements on different parts proceed in parallel. Lock waits
/// are bounded by `SET LOCAL lock_timeout` at the start of every transaction.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    runtime: Arc<Runtime>,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Connect a pool to `database_url`.
    ///
    /// `acquire_timeout` bounds the wait for a pooled connection; `lock_timeout`
    /// bounds row-lock waits inside each transaction and must not be zero.
    /// Failure here means no operation can proceed; callers treat it as fatal.
    pub fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        lock_timeout_statement(lock_timeout)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("stockledger-pg")
            .enable_all()
            .build()
            .map_err(|e| StoreError::Connection(format!("failed to start runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        tracing::info!(max_connections, "connected to postgres");

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
            lock_timeout,
        })
    }

    /// Create the inventory tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub fn migrate(&self) -> Result<(), StoreError> {
        self.runtime
            .block_on(sqlx::raw_sql(SCHEMA).execute(&self.pool))
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

impl TransactionalStore for PostgresStore {
    type Tx = PostgresTransaction;

    fn begin(&self) -> Result<PostgresTransaction, StoreError> {
        let set_timeout = lock_timeout_statement(self.lock_timeout)?;
        let tx = self
            .runtime
            .block_on(async {
                let mut tx = self.pool.begin().await?;
                sqlx::query(&set_timeout).execute(&mut *tx).await?;
                Ok::<_, sqlx::Error>(tx)
            })
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        Ok(PostgresTransaction {
            tx: Some(tx),
            runtime: self.runtime.clone(),
        })
    }
}

/// Unit of work on a [`PostgresStore`].
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    runtime: Arc<Runtime>,
}

impl PostgresTransaction {
    fn open(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>, StoreError> {
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::Backend("transaction already finished".to_string()))
    }
}

impl Transaction for PostgresTransaction {
    #[instrument(level = "debug", skip_all, fields(statement = ?statement.kind()), err)]
    fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome, StoreError> {
        let runtime = self.runtime.clone();
        let tx = self.open()?;
        runtime.block_on(run_statement(&mut **tx, statement))
    }

    #[instrument(
        level = "debug",
        skip_all,
        fields(operation = tracing::field::Empty, row_count = tracing::field::Empty),
        err
    )]
    fn query(&mut self, query: &Query) -> Result<Vec<Record>, StoreError> {
        let runtime = self.runtime.clone();
        let tx = self.open()?;

        let span = Span::current();
        span.record("operation", query_name(query));

        let records = runtime.block_on(run_query(&mut **tx, query))?;
        span.record("row_count", records.len());
        Ok(records)
    }

    fn commit(mut self) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Backend("transaction already finished".to_string()))?;
        // Deferred foreign keys are checked here.
        self.runtime
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    fn rollback(mut self) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Backend("transaction already finished".to_string()))?;
        self.runtime
            .block_on(tx.rollback())
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// `SET LOCAL lock_timeout` for `timeout`, rounded up to whole milliseconds.
///
/// Postgres reads 0 as "no limit", so a zero timeout is refused. SET does not
/// accept bind parameters; the value is an integer we format ourselves.
fn lock_timeout_statement(timeout: Duration) -> Result<String, StoreError> {
    if timeout.is_zero() {
        return Err(StoreError::Backend(
            "lock_timeout must be greater than zero".to_string(),
        ));
    }
    let millis = timeout.as_micros().div_ceil(1_000);
    Ok(format!("SET LOCAL lock_timeout = '{millis}ms'"))
}

fn query_name(query: &Query) -> &'static str {
    match query {
        Query::AllParts => "list_parts",
        Query::Part { .. } => "get_part",
        Query::MovementsFor { .. } => "list_movements",
    }
}

async fn run_statement(
    conn: &mut PgConnection,
    statement: &Statement,
) -> Result<ExecOutcome, StoreError> {
    match statement {
        Statement::InsertPart(part) => {
            let result = sqlx::query(
                r#"
                INSERT INTO inventory_stock (part_no, part_name, part_desc, part_stock)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(part.part_no.as_str())
            .bind(&part.name)
            .bind(&part.description)
            .bind(part.stock)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_part", e))?;
            Ok(ExecOutcome::rows(result.rows_affected()))
        }
        Statement::UpdatePart { part_no, update } => {
            let result = if update.renames(part_no) {
                sqlx::query(
                    r#"
                    UPDATE inventory_stock
                    SET part_no = $1, part_name = $2, part_desc = $3
                    WHERE part_no = $4
                    "#,
                )
                .bind(update.part_no.as_str())
                .bind(&update.name)
                .bind(&update.description)
                .bind(part_no.as_str())
                .execute(&mut *conn)
                .await
            } else {
                sqlx::query(
                    r#"
                    UPDATE inventory_stock
                    SET part_name = $1, part_desc = $2
                    WHERE part_no = $3
                    "#,
                )
                .bind(&update.name)
                .bind(&update.description)
                .bind(part_no.as_str())
                .execute(&mut *conn)
                .await
            };
            let result = result.map_err(|e| map_sqlx_error("update_part", e))?;
            Ok(ExecOutcome::rows(result.rows_affected()))
        }
        Statement::SetStock { part_no, stock } => {
            let result = sqlx::query("UPDATE inventory_stock SET part_stock = $1 WHERE part_no = $2")
                .bind(*stock)
                .bind(part_no.as_str())
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("set_stock", e))?;
            Ok(ExecOutcome::rows(result.rows_affected()))
        }
        Statement::DeletePart { part_no } => {
            let result = sqlx::query("DELETE FROM inventory_stock WHERE part_no = $1")
                .bind(part_no.as_str())
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("delete_part", e))?;
            Ok(ExecOutcome::rows(result.rows_affected()))
        }
        Statement::InsertMovement(new) => {
            // The comment column is only bound when there is a comment.
            let row = match &new.comment {
                Some(comment) => {
                    sqlx::query(
                        r#"
                        INSERT INTO inventory_movement
                            (part_no, mvt_type, mvt_qty, mvt_date, mvt_comment)
                        VALUES ($1, $2, $3, $4, $5)
                        RETURNING mvt_id
                        "#,
                    )
                    .bind(new.part_no.as_str())
                    .bind(new.kind.code())
                    .bind(new.quantity.value())
                    .bind(new.recorded_at)
                    .bind(comment)
                    .fetch_one(&mut *conn)
                    .await
                }
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO inventory_movement (part_no, mvt_type, mvt_qty, mvt_date)
                        VALUES ($1, $2, $3, $4)
                        RETURNING mvt_id
                        "#,
                    )
                    .bind(new.part_no.as_str())
                    .bind(new.kind.code())
                    .bind(new.quantity.value())
                    .bind(new.recorded_at)
                    .fetch_one(&mut *conn)
                    .await
                }
            };
            let row = row.map_err(|e| map_sqlx_error("insert_movement", e))?;

            let id: i64 = row
                .try_get("mvt_id")
                .map_err(|e| map_sqlx_error("insert_movement", e))?;
            Ok(ExecOutcome {
                rows_affected: 1,
                last_insert_id: Some(id),
            })
        }
        Statement::RekeyMovements { from, to } => {
            let result = sqlx::query("UPDATE inventory_movement SET part_no = $1 WHERE part_no = $2")
                .bind(to.as_str())
                .bind(from.as_str())
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("rekey_movements", e))?;
            Ok(ExecOutcome::rows(result.rows_affected()))
        }
        Statement::DeleteMovements { part_no } => {
            let result = sqlx::query("DELETE FROM inventory_movement WHERE part_no = $1")
                .bind(part_no.as_str())
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("delete_movements", e))?;
            Ok(ExecOutcome::rows(result.rows_affected()))
        }
    }
}

async fn run_query(conn: &mut PgConnection, query: &Query) -> Result<Vec<Record>, StoreError> {
    match query {
        Query::AllParts => {
            let rows = sqlx::query(
                r#"
                SELECT part_no, part_name, part_desc, part_stock
                FROM inventory_stock
                ORDER BY part_no ASC
                "#,
            )
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("list_parts", e))?;
            decode_rows::<PartRow>(rows)
        }
        Query::Part { part_no, lock } => {
            let sql = match lock {
                LockMode::Shared => {
                    r#"
                    SELECT part_no, part_name, part_desc, part_stock
                    FROM inventory_stock
                    WHERE part_no = $1
                    "#
                }
                LockMode::ForUpdate => {
                    r#"
                    SELECT part_no, part_name, part_desc, part_stock
                    FROM inventory_stock
                    WHERE part_no = $1
                    FOR UPDATE
                    "#
                }
            };
            let rows = sqlx::query(sql)
                .bind(part_no.as_str())
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("get_part", e))?;
            decode_rows::<PartRow>(rows)
        }
        Query::MovementsFor { part_no } => {
            let rows = sqlx::query(
                r#"
                SELECT mvt_id, part_no, mvt_type, mvt_qty, mvt_comment, mvt_date
                FROM inventory_movement
                WHERE part_no = $1
                ORDER BY mvt_date DESC, mvt_id DESC
                "#,
            )
            .bind(part_no.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("list_movements", e))?;
            decode_rows::<MovementRow>(rows)
        }
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        // sqlx queues the rollback on drop and returns the connection to the pool,
        // which needs a runtime context.
        if let Some(tx) = self.tx.take() {
            let _guard = self.runtime.enter();
            drop(tx);
        }
    }
}

/// Rows that convert into a [`Record`].
trait IntoRecord: for<'r> FromRow<'r, PgRow> {
    fn into_record(self) -> Result<Record, StoreError>;
}

fn decode_rows<R: IntoRecord>(rows: Vec<PgRow>) -> Result<Vec<Record>, StoreError> {
    rows.iter()
        .map(|row| {
            R::from_row(row)
                .map_err(|e| StoreError::Backend(format!("failed to deserialize row: {e}")))?
                .into_record()
        })
        .collect()
}

// SQLx row types

#[derive(Debug)]
struct PartRow {
    part_no: String,
    part_name: String,
    part_desc: String,
    part_stock: i64,
}

impl<'r> FromRow<'r, PgRow> for PartRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PartRow {
            part_no: row.try_get("part_no")?,
            part_name: row.try_get("part_name")?,
            part_desc: row.try_get("part_desc")?,
            part_stock: row.try_get("part_stock")?,
        })
    }
}

impl IntoRecord for PartRow {
    fn into_record(self) -> Result<Record, StoreError> {
        Ok(Record::Part(Part {
            part_no: parse_part_no(&self.part_no)?,
            name: self.part_name,
            description: self.part_desc,
            stock: self.part_stock,
        }))
    }
}

#[derive(Debug)]
struct MovementRow {
    mvt_id: i64,
    part_no: String,
    mvt_type: String,
    mvt_qty: i64,
    mvt_comment: Option<String>,
    mvt_date: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            mvt_id: row.try_get("mvt_id")?,
            part_no: row.try_get("part_no")?,
            mvt_type: row.try_get("mvt_type")?,
            mvt_qty: row.try_get("mvt_qty")?,
            mvt_comment: row.try_get("mvt_comment")?,
            mvt_date: row.try_get("mvt_date")?,
        })
    }
}

impl IntoRecord for MovementRow {
    fn into_record(self) -> Result<Record, StoreError> {
        let kind = MovementType::from_code(self.mvt_type.trim()).ok_or_else(|| {
            StoreError::Backend(format!(
                "movement {} has unknown type code {:?}",
                self.mvt_id, self.mvt_type
            ))
        })?;
        let quantity = Quantity::new(self.mvt_qty)
            .map_err(|e| StoreError::Backend(format!("movement {}: {e}", self.mvt_id)))?;

        Ok(Record::Movement(Movement {
            id: MovementId::new(self.mvt_id),
            part_no: parse_part_no(&self.part_no)?,
            kind,
            quantity,
            comment: self.mvt_comment,
            recorded_at: self.mvt_date,
        }))
    }
}

fn parse_part_no(raw: &str) -> Result<PartNo, StoreError> {
    PartNo::parse(raw).map_err(|e| StoreError::Backend(format!("stored part_no {raw:?}: {e}")))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23503") => StoreError::ForeignKeyViolation(msg),
                Some("55P03") => StoreError::LockTimeout(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Connection(format!("connection pool unavailable in {operation}: {err}"))
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Connection(format!("connection failure in {operation}: {err}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    //! The `#[ignore]`d tests need a live database:
    //! `STOCKLEDGER_DATABASE_URL=postgres://... cargo test -- --ignored`

    use super::*;
    use stockledger_inventory::NewMovement;

    fn connect() -> PostgresStore {
        let url = std::env::var("STOCKLEDGER_DATABASE_URL")
            .expect("STOCKLEDGER_DATABASE_URL must be set for postgres tests");
        let store =
            PostgresStore::connect(&url, 4, Duration::from_secs(10), Duration::from_secs(2)).unwrap();
        store.migrate().unwrap();
        store
    }

    #[test]
    #[ignore]
    fn rename_before_rekey_commits_with_deferred_foreign_key() {
        let store = connect();
        let suffix = unique_suffix();
        let old = PartNo::parse(format!("PG-A-{suffix}")).unwrap();
        let new = PartNo::parse(format!("PG-B-{suffix}")).unwrap();

        let mut tx = store.begin().unwrap();
        tx.execute(&Statement::InsertPart(Part {
            part_no: old.clone(),
            name: "pg".to_string(),
            description: String::new(),
            stock: 1,
        }))
        .unwrap();
        tx.execute(&Statement::InsertMovement(NewMovement::new(
            old.clone(),
            MovementType::In,
            Quantity::new(1).unwrap(),
            Some("opening".to_string()),
            Utc::now(),
        )))
        .unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        tx.execute(&Statement::UpdatePart {
            part_no: old.clone(),
            update: stockledger_inventory::PartUpdate::new(new.as_str(), "pg", "").unwrap(),
        })
        .unwrap();
        tx.execute(&Statement::RekeyMovements {
            from: old.clone(),
            to: new.clone(),
        })
        .unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        let history = tx.query(&Query::MovementsFor { part_no: new.clone() }).unwrap();
        assert_eq!(history.len(), 1);
        let movement = history[0].clone().into_movement().unwrap();
        assert_eq!(movement.kind, MovementType::In);
        assert_eq!(movement.comment.as_deref(), Some("opening"));
        tx.execute(&Statement::DeleteMovements { part_no: new.clone() })
            .unwrap();
        tx.execute(&Statement::DeletePart { part_no: new }).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    #[ignore]
    fn duplicate_part_maps_to_unique_violation() {
        let store = connect();
        let part = Part {
            part_no: PartNo::parse(format!("PG-D-{}", unique_suffix())).unwrap(),
            name: "pg".to_string(),
            description: String::new(),
            stock: 0,
        };

        let mut tx = store.begin().unwrap();
        tx.execute(&Statement::InsertPart(part.clone())).unwrap();
        let err = tx.execute(&Statement::InsertPart(part)).unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
        tx.rollback().unwrap();
    }

    #[test]
    #[ignore]
    fn orphaned_movement_is_rejected_at_commit() {
        let store = connect();
        let missing = PartNo::parse(format!("PG-O-{}", unique_suffix())).unwrap();

        let mut tx = store.begin().unwrap();
        // Deferred: the insert itself succeeds.
        tx.execute(&Statement::InsertMovement(NewMovement::new(
            missing,
            MovementType::Out,
            Quantity::new(1).unwrap(),
            None,
            Utc::now(),
        )))
        .unwrap();

        let err = tx.commit().unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation(_)));
    }

    #[test]
    fn lock_timeout_is_never_unbounded() {
        assert!(matches!(
            lock_timeout_statement(Duration::ZERO),
            Err(StoreError::Backend(_))
        ));
        assert!(matches!(
            PostgresStore::connect("postgres://unused", 1, Duration::from_secs(1), Duration::ZERO),
            Err(StoreError::Backend(_))
        ));
        assert_eq!(
            lock_timeout_statement(Duration::from_micros(1)).unwrap(),
            "SET LOCAL lock_timeout = '1ms'"
        );
        assert_eq!(
            lock_timeout_statement(Duration::from_secs(5)).unwrap(),
            "SET LOCAL lock_timeout = '5000ms'"
        );
    }

    fn unique_suffix() -> String {
        format!("{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }
}
