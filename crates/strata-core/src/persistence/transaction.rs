//! Transactions over the SQLite connection.

use std::cell::RefCell;
use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::ToSql;
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::config::DatabaseLocation;
use crate::error::Result;

/// Primitive value bound to or read from a statement.
pub type SqlValue = rusqlite::types::Value;

/// SQL text with named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlStatement {
    /// Statement text using `:name` placeholders.
    pub sql: String,
    /// Bound parameters, names including the leading colon.
    pub params: Vec<(String, SqlValue)>,
}

impl SqlStatement {
    /// Create a statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind a parameter by name (without the colon).
    pub fn bind(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.push_param(name, value);
        self
    }

    /// Bind a parameter in place.
    pub fn push_param(&mut self, name: &str, value: impl Into<SqlValue>) {
        self.params.push((format!(":{name}"), value.into()));
    }

    fn named_params(&self) -> Vec<(&str, &dyn ToSql)> {
        self.params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }
}

/// A result row keyed by lowercase column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: HashMap<String, SqlValue>,
}

impl Row {
    /// Column value; absent columns read as NULL.
    pub fn get(&self, column: &str) -> &SqlValue {
        const NULL: &SqlValue = &SqlValue::Null;
        self.columns.get(&column.to_lowercase()).unwrap_or(NULL)
    }

    /// Integer column value.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column) {
            SqlValue::Integer(v) => Some(*v),
            SqlValue::Real(v) => Some(*v as i64),
            SqlValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Text column value.
    pub fn get_text(&self, column: &str) -> Option<&str> {
        match self.get(column) {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Hands out transactions on a single connection.
///
/// The connection mutex is held for the whole transaction, which
/// serializes engine access.
#[derive(Debug)]
pub struct TransactionManager {
    conn: Mutex<Connection>,
}

impl TransactionManager {
    /// Open the database.
    pub fn open(location: &DatabaseLocation) -> Result<Self> {
        let conn = match location {
            DatabaseLocation::InMemory => Connection::open_in_memory()?,
            DatabaseLocation::Path(path) => Connection::open(path)?,
        };
        debug!(location = ?location, "database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Begin a transaction.
    pub fn open_transaction(&self) -> Result<Transaction<'_>> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Transaction {
            conn,
            finished: false,
            on_commit: RefCell::new(Vec::new()),
        })
    }
}

type CommitHook<'a> = Box<dyn FnOnce() + 'a>;

/// An open transaction. Dropping it without commit rolls it back.
pub struct Transaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
    on_commit: RefCell<Vec<CommitHook<'a>>>,
}

impl<'a> Transaction<'a> {
    /// Execute an UPDATE, DELETE or INSERT and return the affected row count.
    pub fn execute_update(&self, stmt: &SqlStatement) -> Result<usize> {
        debug!(sql = %stmt.sql, params = stmt.params.len(), "execute");
        let count = self
            .conn
            .execute(&stmt.sql, stmt.named_params().as_slice())?;
        Ok(count)
    }

    /// Execute an INSERT and return the new row identity.
    pub fn execute_insert(&self, stmt: &SqlStatement) -> Result<i64> {
        debug!(sql = %stmt.sql, params = stmt.params.len(), "insert");
        self.conn
            .execute(&stmt.sql, stmt.named_params().as_slice())?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Run a query and collect its rows.
    pub fn query(&self, stmt: &SqlStatement) -> Result<Vec<Row>> {
        debug!(sql = %stmt.sql, params = stmt.params.len(), "query");
        let mut prepared = self.conn.prepare(&stmt.sql)?;
        let names: Vec<String> = prepared
            .column_names()
            .iter()
            .map(|name| name.to_lowercase())
            .collect();
        let params = stmt.named_params();
        let mut rows = prepared.query(params.as_slice())?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut columns = HashMap::with_capacity(names.len());
            for (idx, name) in names.iter().enumerate() {
                let value: SqlValue = row.get(idx)?;
                columns.insert(name.clone(), value);
            }
            out.push(Row { columns });
        }
        Ok(out)
    }

    /// Execute a DDL statement.
    pub fn execute_ddl(&self, sql: &str) -> Result<()> {
        debug!(sql = %sql, "ddl");
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run `hook` once the transaction has committed.
    pub fn after_commit(&self, hook: impl FnOnce() + 'a) {
        self.on_commit.borrow_mut().push(Box::new(hook));
    }

    /// Commit and run the commit hooks.
    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        let hooks = std::mem::take(&mut *self.on_commit.borrow_mut());
        for hook in hooks {
            hook();
        }
        Ok(())
    }

    /// Roll back, discarding commit hooks.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            warn!(error = %e, "rollback failed");
        } else {
            debug!("transaction rolled back");
        }
    }
}

/// Whether the error is a unique-constraint rejection.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Quote an identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
