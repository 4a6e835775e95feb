//! In-process database backend.
//!
//! Tables live behind one mutex shared by every connection. There is no
//! isolation: a transaction snapshots all tables on `begin` and restores the
//! snapshot on `rollback`, which is enough for fixture tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Connection, ConnectionFactory, DatabaseError, Statement};
use crate::dataset::Value;

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<String>,
    primary_key: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    fn index(&self, table: &str, column: &str) -> Result<usize, DatabaseError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| DatabaseError::UnknownColumn {
                table: table.to_owned(),
                column: column.to_owned(),
            })
    }

    fn indices(&self, table: &str, columns: &[String]) -> Result<Vec<usize>, DatabaseError> {
        columns.iter().map(|c| self.index(table, c)).collect()
    }
}

type Tables = BTreeMap<String, MemoryTable>;

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    open: AtomicUsize,
}

/// Cloneable handle to an in-memory database.
///
/// # Examples
///
/// ```
/// use dbfixture::database::{Connection, ConnectionFactory, MemoryDatabase, Statement};
///
/// let db = MemoryDatabase::new();
/// db.create_table("users", &["id", "name"], &["id"]).unwrap();
///
/// let conn = db.open().unwrap();
/// conn.execute(&Statement::Insert {
///     table: "users".into(),
///     columns: vec!["id".into()],
///     values: vec![1i64.into()],
/// }).unwrap();
///
/// assert_eq!(db.row_count("users").unwrap(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.shared
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates (or replaces) a table. Every primary-key column must be one of
    /// `columns`.
    pub fn create_table(
        &self,
        name: &str,
        columns: &[&str],
        primary_key: &[&str],
    ) -> Result<(), DatabaseError> {
        if let Some(missing) = primary_key.iter().find(|k| !columns.contains(*k)) {
            return Err(DatabaseError::UnknownColumn {
                table: name.to_owned(),
                column: (*missing).to_owned(),
            });
        }

        let table = MemoryTable {
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            primary_key: primary_key.iter().map(|c| (*c).to_owned()).collect(),
            rows: Vec::new(),
        };
        self.tables().insert(name.to_owned(), table);
        Ok(())
    }

    pub fn row_count(&self, table: &str) -> Result<usize, DatabaseError> {
        self.with_table(table, |t| t.rows.len())
    }

    /// All rows of `table`, in insertion order and column order.
    pub fn rows(&self, table: &str) -> Result<Vec<Vec<Value>>, DatabaseError> {
        self.with_table(table, |t| t.rows.clone())
    }

    /// Every value of `column` in `table`, in insertion order.
    pub fn column(&self, table: &str, column: &str) -> Result<Vec<Value>, DatabaseError> {
        let tables = self.tables();
        let t = tables.get(table).ok_or_else(|| unknown_table(table))?;
        let index = t.index(table, column)?;
        Ok(t.rows.iter().map(|row| row[index].clone()).collect())
    }

    /// Number of connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn with_table<R>(
        &self,
        table: &str,
        f: impl FnOnce(&MemoryTable) -> R,
    ) -> Result<R, DatabaseError> {
        self.tables()
            .get(table)
            .map(f)
            .ok_or_else(|| unknown_table(table))
    }
}

fn unknown_table(table: &str) -> DatabaseError {
    DatabaseError::UnknownTable {
        table: table.to_owned(),
    }
}

impl ConnectionFactory for MemoryDatabase {
    fn open(&self) -> Result<Arc<dyn Connection>, DatabaseError> {
        self.shared.open.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryConnection {
            db: self.clone(),
            snapshot: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    db: MemoryDatabase,
    snapshot: Mutex<Option<Tables>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatabaseError::ConnectionClosed);
        }
        Ok(())
    }

    fn snapshot(&self) -> MutexGuard<'_, Option<Tables>> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn matches_key(row: &[Value], indices: &[usize], key: &[Value]) -> bool {
    indices.iter().zip(key).all(|(&i, value)| &row[i] == value)
}

fn insert(
    name: &str,
    table: &mut MemoryTable,
    columns: &[String],
    values: &[Value],
) -> Result<u64, DatabaseError> {
    let mut row = vec![Value::Null; table.columns.len()];
    for (column, value) in columns.iter().zip(values) {
        let index = table.index(name, column)?;
        row[index] = value.clone();
    }

    let key_indices = table.indices(name, &table.primary_key.clone())?;
    if let Some(&i) = key_indices.iter().find(|&&i| row[i].is_null()) {
        return Err(DatabaseError::ConstraintViolation {
            table: name.to_owned(),
            reason: format!("primary key column '{}' is null", table.columns[i]),
        });
    }
    if !key_indices.is_empty() {
        let key: Vec<Value> = key_indices.iter().map(|&i| row[i].clone()).collect();
        if table.rows.iter().any(|r| matches_key(r, &key_indices, &key)) {
            let shown: Vec<String> = key.iter().map(ToString::to_string).collect();
            return Err(DatabaseError::ConstraintViolation {
                table: name.to_owned(),
                reason: format!("duplicate primary key ({})", shown.join(", ")),
            });
        }
    }

    table.rows.push(row);
    Ok(1)
}

impl Connection for MemoryConnection {
    fn execute(&self, statement: &Statement) -> Result<u64, DatabaseError> {
        self.ensure_open()?;
        let mut tables = self.db.tables();
        let name = statement.table();
        let table = tables.get_mut(name).ok_or_else(|| unknown_table(name))?;

        match statement {
            Statement::Insert {
                columns, values, ..
            } => insert(name, table, columns, values),
            Statement::Update {
                columns,
                values,
                key_columns,
                key_values,
                ..
            } => {
                let set = table.indices(name, columns)?;
                let keys = table.indices(name, key_columns)?;
                let mut affected = 0;
                for row in table
                    .rows
                    .iter_mut()
                    .filter(|row| matches_key(row, &keys, key_values))
                {
                    for (&i, value) in set.iter().zip(values) {
                        row[i] = value.clone();
                    }
                    affected += 1;
                }
                Ok(affected)
            }
            Statement::Delete {
                key_columns,
                key_values,
                ..
            } => {
                let keys = table.indices(name, key_columns)?;
                let before = table.rows.len();
                table.rows.retain(|row| !matches_key(row, &keys, key_values));
                Ok((before - table.rows.len()) as u64)
            }
            Statement::DeleteAll { .. } | Statement::Truncate { .. } => {
                let removed = table.rows.len() as u64;
                table.rows.clear();
                Ok(removed)
            }
        }
    }

    fn primary_keys(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        self.ensure_open()?;
        self.db.with_table(table, |t| t.primary_key.clone())
    }

    fn begin(&self) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        let tables = Tables::clone(&self.db.tables());
        *self.snapshot() = Some(tables);
        Ok(())
    }

    fn commit(&self) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        self.snapshot()
            .take()
            .map(|_| ())
            .ok_or(DatabaseError::NoTransaction)
    }

    fn rollback(&self) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        let saved = self.snapshot().take().ok_or(DatabaseError::NoTransaction)?;
        *self.db.tables() = saved;
        Ok(())
    }

    fn close(&self) -> Result<(), DatabaseError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(saved) = self.snapshot().take() {
            *self.db.tables() = saved;
        }
        self.db.shared.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.create_table("users", &["id", "name"], &["id"]).unwrap();
        db
    }

    fn insert_user(id: i64, name: &str) -> Statement {
        Statement::Insert {
            table: "users".into(),
            columns: vec!["id".into(), "name".into()],
            values: vec![id.into(), name.into()],
        }
    }

    #[test]
    fn create_table_checks_key_columns() {
        let db = MemoryDatabase::new();
        let err = db.create_table("t", &["a"], &["b"]).unwrap_err();
        assert!(matches!(err, DatabaseError::UnknownColumn { column, .. } if column == "b"));
    }

    #[test]
    fn insert_and_read_back() {
        let db = db();
        let conn = db.open().unwrap();
        assert_eq!(conn.execute(&insert_user(1, "ada")).unwrap(), 1);
        assert_eq!(
            db.rows("users").unwrap(),
            vec![vec![Value::Int(1), Value::from("ada")]]
        );
    }

    #[test]
    fn duplicate_key_is_constraint_violation() {
        let db = db();
        let conn = db.open().unwrap();
        conn.execute(&insert_user(1, "ada")).unwrap();
        let err = conn.execute(&insert_user(1, "bob")).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation { .. }));
        assert_eq!(db.row_count("users").unwrap(), 1);
    }

    #[test]
    fn null_key_is_constraint_violation() {
        let db = db();
        let conn = db.open().unwrap();
        let statement = Statement::Insert {
            table: "users".into(),
            columns: vec!["name".into()],
            values: vec!["ada".into()],
        };
        assert!(matches!(
            conn.execute(&statement),
            Err(DatabaseError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn unknown_table_and_column() {
        let db = db();
        let conn = db.open().unwrap();
        assert!(matches!(
            conn.execute(&Statement::DeleteAll { table: "nope".into() }),
            Err(DatabaseError::UnknownTable { .. })
        ));
        let statement = Statement::Insert {
            table: "users".into(),
            columns: vec!["id".into(), "email".into()],
            values: vec![1i64.into(), "x".into()],
        };
        assert!(matches!(
            conn.execute(&statement),
            Err(DatabaseError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn update_and_delete_by_key() {
        let db = db();
        let conn = db.open().unwrap();
        conn.execute(&insert_user(1, "ada")).unwrap();
        conn.execute(&insert_user(2, "bob")).unwrap();

        let update = Statement::Update {
            table: "users".into(),
            columns: vec!["name".into()],
            values: vec!["eve".into()],
            key_columns: vec!["id".into()],
            key_values: vec![2i64.into()],
        };
        assert_eq!(conn.execute(&update).unwrap(), 1);
        assert_eq!(
            db.column("users", "name").unwrap(),
            vec![Value::from("ada"), Value::from("eve")]
        );

        let delete = Statement::Delete {
            table: "users".into(),
            key_columns: vec!["id".into()],
            key_values: vec![1i64.into()],
        };
        assert_eq!(conn.execute(&delete).unwrap(), 1);
        assert_eq!(conn.execute(&delete).unwrap(), 0);
        assert_eq!(db.row_count("users").unwrap(), 1);
    }

    #[test]
    fn rollback_restores_snapshot() {
        let db = db();
        let conn = db.open().unwrap();
        conn.execute(&insert_user(1, "ada")).unwrap();

        conn.begin().unwrap();
        conn.execute(&Statement::DeleteAll { table: "users".into() }).unwrap();
        assert_eq!(db.row_count("users").unwrap(), 0);
        conn.rollback().unwrap();

        assert_eq!(db.row_count("users").unwrap(), 1);
        assert!(matches!(conn.commit(), Err(DatabaseError::NoTransaction)));
    }

    #[test]
    fn closed_connection_rejects_statements() {
        let db = db();
        let conn = db.open().unwrap();
        assert_eq!(db.open_connections(), 1);
        conn.close().unwrap();
        conn.close().unwrap();
        assert_eq!(db.open_connections(), 0);
        assert!(matches!(
            conn.execute(&insert_user(1, "ada")),
            Err(DatabaseError::ConnectionClosed)
        ));
    }
}
