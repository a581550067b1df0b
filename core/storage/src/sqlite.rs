//! SQLite-backed record store.
//!
//! Persists expense records in a single `expenses` table. Timestamps are
//! stored as Unix milliseconds and amounts as decimal text so that values
//! read back compare equal to what was written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row, Statement};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::store::{RecordStore, UpdateGuard};
use expensync_common::{
    time, Amount, Category, Description, Error, Expense, ExpenseId, ExpensePatch, NewExpense,
    OwnerId, Result, SyncStatus,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS expenses (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        amount TEXT NOT NULL,
        description TEXT NOT NULL,
        category TEXT NOT NULL,
        date INTEGER NOT NULL,
        last_modified INTEGER NOT NULL,
        sync_status TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_expenses_owner_date ON expenses(owner_id, date DESC);
    CREATE INDEX IF NOT EXISTS idx_expenses_owner_modified ON expenses(owner_id, last_modified);
    CREATE INDEX IF NOT EXISTS idx_expenses_sync_status ON expenses(sync_status);
"#;

const SELECT_COLUMNS: &str = "SELECT id, owner_id, amount, description, category, date, \
     last_modified, sync_status, created_at FROM expenses";

/// Record store on top of a single SQLite connection.
///
/// Statements run on tokio's blocking pool. The connection mutex serialises
/// them, and guarded writes additionally run inside a transaction with the
/// expected last-modified value in the `WHERE` clause.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(storage_error)?;
        conn.execute_batch(SCHEMA).map_err(storage_error)?;

        info!("SQLite record store opened at {}", db_path.as_ref().display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::Storage("sqlite connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Storage(format!("sqlite task failed: {}", e)))?
    }
}

fn storage_error(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Storage(format!("timestamp out of range: {}", ms)))
}

/// Raw column values of one `expenses` row.
struct ExpenseRow {
    id: String,
    owner_id: String,
    amount: String,
    description: String,
    category: String,
    date: i64,
    last_modified: i64,
    sync_status: String,
    created_at: i64,
}

impl ExpenseRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            amount: row.get(2)?,
            description: row.get(3)?,
            category: row.get(4)?,
            date: row.get(5)?,
            last_modified: row.get(6)?,
            sync_status: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_expense(self) -> Result<Expense> {
        let amount = Decimal::from_str(&self.amount)
            .map_err(|e| Error::Storage(format!("bad amount {:?}: {}", self.amount, e)))?;

        Ok(Expense {
            id: ExpenseId::new(self.id),
            owner_id: OwnerId::new(self.owner_id)?,
            amount: Amount::new(amount)?,
            description: Description::new(self.description)?,
            category: Category::from_str(&self.category)?,
            date: from_millis(self.date)?,
            last_modified: from_millis(self.last_modified)?,
            sync_status: SyncStatus::from_str(&self.sync_status)?,
            created_at: from_millis(self.created_at)?,
        })
    }
}

fn collect_expenses<P: Params>(stmt: &mut Statement<'_>, params: P) -> Result<Vec<Expense>> {
    let rows = stmt
        .query_map(params, ExpenseRow::from_row)
        .map_err(storage_error)?;

    let mut expenses = Vec::new();
    for row in rows {
        expenses.push(row.map_err(storage_error)?.into_expense()?);
    }
    Ok(expenses)
}

fn select_by_id(conn: &Connection, id: &str) -> Result<Option<Expense>> {
    let row = conn
        .query_row(
            &format!("{} WHERE id = ?1", SELECT_COLUMNS),
            [id],
            ExpenseRow::from_row,
        )
        .optional()
        .map_err(storage_error)?;

    row.map(ExpenseRow::into_expense).transpose()
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn find_by_owner_since(
        &self,
        owner: &OwnerId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Expense>> {
        let owner = owner.as_str().to_string();
        let since = since.timestamp_millis();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} WHERE owner_id = ?1 AND last_modified > ?2 \
                     ORDER BY last_modified ASC, id ASC",
                    SELECT_COLUMNS
                ))
                .map_err(storage_error)?;
            collect_expenses(&mut stmt, params![owner, since])
        })
        .await
    }

    async fn find_by_owner(&self, owner: &OwnerId) -> Result<Vec<Expense>> {
        let owner = owner.as_str().to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} WHERE owner_id = ?1 ORDER BY date DESC, id ASC",
                    SELECT_COLUMNS
                ))
                .map_err(storage_error)?;
            collect_expenses(&mut stmt, params![owner])
        })
        .await
    }

    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>> {
        let id = id.as_str().to_string();
        self.with_conn(move |conn| select_by_id(conn, &id)).await
    }

    async fn create(
        &self,
        owner: &OwnerId,
        new: NewExpense,
        modified_at: DateTime<Utc>,
    ) -> Result<Expense> {
        let expense = Expense::from_new(
            ExpenseId::generate(),
            owner.clone(),
            new,
            time::truncate_to_millis(modified_at),
        );
        debug!("Creating expense {} for {}", expense.id, owner);

        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO expenses
                (id, owner_id, amount, description, category, date,
                 last_modified, sync_status, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    expense.id.as_str(),
                    expense.owner_id.as_str(),
                    expense.amount.value().to_string(),
                    expense.description.as_str(),
                    expense.category.as_str(),
                    expense.date.timestamp_millis(),
                    expense.last_modified.timestamp_millis(),
                    expense.sync_status.as_str(),
                    expense.created_at.timestamp_millis(),
                ],
            )
            .map_err(storage_error)?;
            Ok(expense)
        })
        .await
    }

    async fn update_in_place(
        &self,
        id: &ExpenseId,
        patch: &ExpensePatch,
        guard: UpdateGuard,
    ) -> Result<Expense> {
        let id = id.clone();
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_error)?;

            let mut current = select_by_id(&tx, id.as_str())?
                .ok_or_else(|| Error::NotFound(format!("Expense not found: {}", id)))?;
            if current.last_modified != guard.expected_last_modified {
                return Err(Error::StaleWrite(Box::new(current)));
            }

            let modified_at = time::advance(current.last_modified, guard.modified_at);
            patch.apply_to(&mut current, modified_at);

            let changed = tx
                .execute(
                    r#"
                    UPDATE expenses
                    SET amount = ?1, description = ?2, category = ?3, date = ?4,
                        last_modified = ?5, sync_status = ?6
                    WHERE id = ?7 AND last_modified = ?8
                    "#,
                    params![
                        current.amount.value().to_string(),
                        current.description.as_str(),
                        current.category.as_str(),
                        current.date.timestamp_millis(),
                        current.last_modified.timestamp_millis(),
                        current.sync_status.as_str(),
                        id.as_str(),
                        guard.expected_last_modified.timestamp_millis(),
                    ],
                )
                .map_err(storage_error)?;

            if changed == 0 {
                // Another writer on the same file got in between.
                return match select_by_id(&tx, id.as_str())? {
                    Some(now) => Err(Error::StaleWrite(Box::new(now))),
                    None => Err(Error::NotFound(format!("Expense not found: {}", id))),
                };
            }

            tx.commit().map_err(storage_error)?;
            debug!("Updated expense {} at {}", id, modified_at);
            Ok(current)
        })
        .await
    }

    async fn delete_by_id(&self, id: &ExpenseId) -> Result<bool> {
        let id = id.as_str().to_string();
        self.with_conn(move |conn| {
            let removed = conn
                .execute("DELETE FROM expenses WHERE id = ?1", params![id])
                .map_err(storage_error)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn delete_guarded(
        &self,
        id: &ExpenseId,
        expected_last_modified: DateTime<Utc>,
    ) -> Result<bool> {
        let id = id.as_str().to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_error)?;

            let Some(current) = select_by_id(&tx, &id)? else {
                return Ok(false);
            };
            if current.last_modified != expected_last_modified {
                return Err(Error::StaleWrite(Box::new(current)));
            }

            let removed = tx
                .execute(
                    "DELETE FROM expenses WHERE id = ?1 AND last_modified = ?2",
                    params![id, expected_last_modified.timestamp_millis()],
                )
                .map_err(storage_error)?;
            tx.commit().map_err(storage_error)?;
            Ok(removed > 0)
        })
        .await
    }
}
