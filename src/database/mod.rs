//! Database layer — connections, data sources, and transaction binding.
//!
//! ## Core types
//!
//! - [`Connection`] — a live connection that executes [`Statement`]s.
//! - [`ConnectionFactory`] — the driver side: opens raw connections.
//! - [`DataSource`] — what fixtures borrow connections from. Acquisition is
//!   transaction aware and release is skipped for transactional connections.
//! - [`ManagedDataSource`] — a [`DataSource`] over any factory that binds at
//!   most one transaction per thread.
//! - [`MemoryDatabase`] — an in-process backend for tests and demos.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use thiserror::Error;
use tracing::{debug, warn};

mod memory;
mod statement;

pub use memory::MemoryDatabase;
pub use statement::Statement;

/// Errors produced by connections and data sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseError {
    #[error("connection is closed")]
    ConnectionClosed,

    #[error("table '{table}' does not exist")]
    UnknownTable { table: String },

    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("constraint violation on '{table}': {reason}")]
    ConstraintViolation { table: String, reason: String },

    #[error("a transaction is already active on this thread")]
    TransactionActive,

    #[error("no transaction is active on this connection")]
    NoTransaction,

    #[error("failed to open connection: {reason}")]
    Connect { reason: String },
}

/// A live database connection.
///
/// Methods take `&self`; implementations serialize access internally so that
/// one connection can be shared between a transaction owner and fixtures.
pub trait Connection: Send + Sync {
    /// Executes `statement` and returns the number of affected rows.
    fn execute(&self, statement: &Statement) -> Result<u64, DatabaseError>;

    /// Primary-key columns of `table`, in key order. Empty if none.
    fn primary_keys(&self, table: &str) -> Result<Vec<String>, DatabaseError>;

    fn begin(&self) -> Result<(), DatabaseError>;

    fn commit(&self) -> Result<(), DatabaseError>;

    fn rollback(&self) -> Result<(), DatabaseError>;

    /// Closes the connection. Closing twice is a no-op.
    fn close(&self) -> Result<(), DatabaseError>;
}

/// Opens raw connections.
pub trait ConnectionFactory: Send + Sync {
    fn open(&self) -> Result<Arc<dyn Connection>, DatabaseError>;
}

/// A source of borrowed connections, aware of ambient transactions.
///
/// # Contract
///
/// - [`acquire`](Self::acquire) returns the connection of the transaction
///   active on the calling thread, if any, and a fresh connection otherwise.
/// - [`is_transactional`](Self::is_transactional) reports whether a
///   connection belongs to such a transaction.
/// - [`release`](Self::release) must only be called for non-transactional
///   connections; the transaction owner releases its own.
pub trait DataSource: Send + Sync {
    fn acquire(&self) -> Result<Arc<dyn Connection>, DatabaseError>;

    fn is_transactional(&self, connection: &Arc<dyn Connection>) -> bool;

    fn release(&self, connection: Arc<dyn Connection>) -> Result<(), DatabaseError>;
}

/// Shared handle under which data sources are registered in a
/// [`Context`](crate::context::Context).
pub type DataSourceRef = Arc<dyn DataSource>;

// Identity comparison that ignores vtable pointers.
fn same_connection(a: &Arc<dyn Connection>, b: &Arc<dyn Connection>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Transaction-aware [`DataSource`] over a [`ConnectionFactory`].
///
/// At most one transaction is bound per thread. While a [`Transaction`] is
/// alive, [`acquire`](DataSource::acquire) on that thread hands out the
/// transaction's connection.
///
/// # Examples
///
/// ```
/// use dbfixture::database::{DataSource, ManagedDataSource, MemoryDatabase};
///
/// let db = MemoryDatabase::new();
/// let source = ManagedDataSource::new(db);
///
/// let tx = source.begin_transaction().unwrap();
/// let conn = source.acquire().unwrap();
/// assert!(source.is_transactional(&conn));
/// tx.rollback().unwrap();
/// ```
pub struct ManagedDataSource<F> {
    factory: F,
    bound: Mutex<HashMap<ThreadId, Arc<dyn Connection>>>,
}

impl<F: ConnectionFactory> ManagedDataSource<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            bound: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    fn bound(&self) -> MutexGuard<'_, HashMap<ThreadId, Arc<dyn Connection>>> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a connection, begins a transaction on it, and binds it to the
    /// calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::TransactionActive`] if this thread already has
    /// one, or any error from opening or beginning the connection.
    pub fn begin_transaction(&self) -> Result<Transaction<'_, F>, DatabaseError> {
        let thread = thread::current().id();
        if self.bound().contains_key(&thread) {
            return Err(DatabaseError::TransactionActive);
        }

        let connection = self.factory.open()?;
        if let Err(e) = connection.begin() {
            let _ = connection.close();
            return Err(e);
        }

        self.bound().insert(thread, Arc::clone(&connection));
        debug!(?thread, "transaction bound");

        Ok(Transaction {
            source: self,
            thread,
            connection,
            finished: false,
        })
    }

    /// Returns `true` if the calling thread has a bound transaction.
    pub fn in_transaction(&self) -> bool {
        self.bound().contains_key(&thread::current().id())
    }

    fn unbind(&self, thread: ThreadId) {
        self.bound().remove(&thread);
    }
}

impl<F: ConnectionFactory> DataSource for ManagedDataSource<F> {
    fn acquire(&self) -> Result<Arc<dyn Connection>, DatabaseError> {
        if let Some(connection) = self.bound().get(&thread::current().id()) {
            return Ok(Arc::clone(connection));
        }
        self.factory.open()
    }

    fn is_transactional(&self, connection: &Arc<dyn Connection>) -> bool {
        self.bound()
            .get(&thread::current().id())
            .is_some_and(|bound| same_connection(bound, connection))
    }

    fn release(&self, connection: Arc<dyn Connection>) -> Result<(), DatabaseError> {
        connection.close()
    }
}

/// A transaction bound to the thread that began it.
///
/// Finish it with [`commit`](Self::commit) or [`rollback`](Self::rollback).
/// Dropping an unfinished transaction rolls it back. Either way the
/// connection is unbound and closed.
pub struct Transaction<'a, F: ConnectionFactory> {
    source: &'a ManagedDataSource<F>,
    thread: ThreadId,
    connection: Arc<dyn Connection>,
    finished: bool,
}

impl<F: ConnectionFactory> Transaction<'_, F> {
    /// The transaction's connection.
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn commit(mut self) -> Result<(), DatabaseError> {
        self.finished = true;
        let result = self.connection.commit();
        self.end();
        result
    }

    pub fn rollback(mut self) -> Result<(), DatabaseError> {
        self.finished = true;
        let result = self.connection.rollback();
        self.end();
        result
    }

    fn end(&self) {
        self.source.unbind(self.thread);
        if let Err(e) = self.connection.close() {
            warn!(error = %e, "failed to close transaction connection");
        }
    }
}

impl<F: ConnectionFactory> Drop for Transaction<'_, F> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.connection.rollback() {
            warn!(error = %e, "rollback of abandoned transaction failed");
        }
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> ManagedDataSource<MemoryDatabase> {
        let db = MemoryDatabase::new();
        db.create_table("users", &["id", "name"], &["id"]).unwrap();
        ManagedDataSource::new(db)
    }

    fn insert(id: i64) -> Statement {
        Statement::Insert {
            table: "users".into(),
            columns: vec!["id".into()],
            values: vec![id.into()],
        }
    }

    // ── Acquisition ───────────────────────────────────────────────────────────

    #[test]
    fn acquire_without_transaction_opens_fresh_connections() {
        let source = source();
        let a = source.acquire().unwrap();
        let b = source.acquire().unwrap();
        assert!(!same_connection(&a, &b));
        assert!(!source.is_transactional(&a));
        assert_eq!(source.factory().open_connections(), 2);

        source.release(a).unwrap();
        source.release(b).unwrap();
        assert_eq!(source.factory().open_connections(), 0);
    }

    #[test]
    fn acquire_inside_transaction_returns_bound_connection() {
        let source = source();
        let tx = source.begin_transaction().unwrap();

        let conn = source.acquire().unwrap();
        assert!(same_connection(&conn, tx.connection()));
        assert!(source.is_transactional(&conn));
        assert!(source.in_transaction());

        tx.commit().unwrap();
        assert!(!source.in_transaction());
        assert!(!source.is_transactional(&conn));
    }

    #[test]
    fn transaction_is_thread_local() {
        let source = source();
        let _tx = source.begin_transaction().unwrap();

        thread::scope(|scope| {
            scope.spawn(|| {
                let conn = source.acquire().unwrap();
                assert!(!source.is_transactional(&conn));
                source.release(conn).unwrap();
            });
        });
    }

    #[test]
    fn second_begin_on_same_thread_rejected() {
        let source = source();
        let _tx = source.begin_transaction().unwrap();
        assert!(matches!(
            source.begin_transaction(),
            Err(DatabaseError::TransactionActive)
        ));
    }

    // ── Completion ────────────────────────────────────────────────────────────

    #[test]
    fn commit_keeps_writes() {
        let source = source();
        let tx = source.begin_transaction().unwrap();
        tx.connection().execute(&insert(1)).unwrap();
        tx.commit().unwrap();
        assert_eq!(source.factory().row_count("users").unwrap(), 1);
        assert_eq!(source.factory().open_connections(), 0);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let source = source();
        {
            let tx = source.begin_transaction().unwrap();
            tx.connection().execute(&insert(1)).unwrap();
        }
        assert_eq!(source.factory().row_count("users").unwrap(), 0);
        assert!(!source.in_transaction());
        assert_eq!(source.factory().open_connections(), 0);
    }
}
