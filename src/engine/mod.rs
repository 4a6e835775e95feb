//! Dataset engine — applies [`Operation`]s to a database through a configured
//! connection handle.
//!
//! A [`DatabaseConnection`] binds one live [`Connection`] to a
//! [`DatabaseConfig`]. Callers tune the config through a
//! [`DatabaseConnectionConfigurer`] before running an operation:
//!
//! ```
//! use dbfixture::database::{ConnectionFactory, MemoryDatabase};
//! use dbfixture::engine::{DataTypeFactory, DatabaseConnection, DatabaseConnectionConfigurer};
//!
//! let db = MemoryDatabase::new();
//! let mut handle = DatabaseConnection::new(db.open().unwrap());
//!
//! let configurer = |config: &mut dbfixture::engine::DatabaseConfig| {
//!     config.set_data_type_factory(DataTypeFactory::MySql);
//!     config.set_escape_pattern("`?`")
//! };
//! configurer.configure(handle.config_mut()).unwrap();
//!
//! assert_eq!(handle.config().escape("users"), "`users`");
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::database::{Connection, DatabaseError, Statement};
use crate::dataset::Value;

mod operation;

pub use operation::{Operation, OperationReport};

/// Errors produced while configuring the engine or running an operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("invalid escape pattern '{pattern}': it must contain '?'")]
    InvalidEscapePattern { pattern: String },

    #[error("{operation} needs a primary key but table '{table}' has none")]
    MissingPrimaryKey { table: String, operation: Operation },

    #[error("table '{table}' has no column for primary key '{column}'")]
    MissingKeyColumn { table: String, column: String },

    #[error("table '{table}' row {row}: no database row matches its primary key")]
    RowNotFound { table: String, row: usize },

    #[error("table '{table}' row {row}: column '{column}' is an empty string")]
    EmptyField {
        table: String,
        row: usize,
        column: String,
    },
}

/// Dialect-specific value conversion applied to every cell before it is
/// written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataTypeFactory {
    #[default]
    Default,
    H2,
    Hsqldb,
    MySql,
    Oracle,
    Postgresql,
}

impl DataTypeFactory {
    /// Converts `value` into the form the target database stores.
    ///
    /// MySQL and Oracle have no boolean column type, so booleans become
    /// `0`/`1`. Oracle also stores the empty string as NULL.
    pub fn coerce(self, value: Value) -> Value {
        match (self, value) {
            (Self::MySql | Self::Oracle, Value::Bool(b)) => Value::Int(i64::from(b)),
            (Self::Oracle, Value::Text(s)) if s.is_empty() => Value::Null,
            (_, value) => value,
        }
    }
}

/// Engine settings for one connection handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    escape_pattern: Option<String>,
    data_type_factory: DataTypeFactory,
    allow_empty_fields: bool,
    primary_keys: BTreeMap<String, Vec<String>>,
}

impl DatabaseConfig {
    /// Sets the identifier escape pattern; `?` is replaced with the name,
    /// e.g. `"\"?\""` or `` "`?`" ``.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidEscapePattern`] if `pattern` has no `?`.
    pub fn set_escape_pattern(&mut self, pattern: impl Into<String>) -> Result<(), EngineError> {
        let pattern = pattern.into();
        if !pattern.contains('?') {
            return Err(EngineError::InvalidEscapePattern { pattern });
        }
        self.escape_pattern = Some(pattern);
        Ok(())
    }

    pub fn escape_pattern(&self) -> Option<&str> {
        self.escape_pattern.as_deref()
    }

    /// Applies the escape pattern to a table or column name.
    pub fn escape(&self, name: &str) -> String {
        match &self.escape_pattern {
            Some(pattern) => pattern.replace('?', name),
            None => name.to_owned(),
        }
    }

    pub fn set_data_type_factory(&mut self, factory: DataTypeFactory) {
        self.data_type_factory = factory;
    }

    pub fn data_type_factory(&self) -> DataTypeFactory {
        self.data_type_factory
    }

    /// Whether empty strings are accepted as cell values (default `false`).
    pub fn set_allow_empty_fields(&mut self, allow: bool) {
        self.allow_empty_fields = allow;
    }

    pub fn allow_empty_fields(&self) -> bool {
        self.allow_empty_fields
    }

    /// Overrides the primary key the engine uses for `table`, instead of
    /// asking the connection.
    pub fn set_primary_keys<I, S>(&mut self, table: impl Into<String>, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys
            .insert(table.into(), columns.into_iter().map(Into::into).collect());
    }

    pub fn primary_keys(&self, table: &str) -> Option<&[String]> {
        self.primary_keys.get(table).map(Vec::as_slice)
    }
}

/// Mutates engine settings before an operation runs.
pub trait DatabaseConnectionConfigurer {
    fn configure(&self, config: &mut DatabaseConfig) -> Result<(), EngineError>;
}

impl<F> DatabaseConnectionConfigurer for F
where
    F: Fn(&mut DatabaseConfig) -> Result<(), EngineError>,
{
    fn configure(&self, config: &mut DatabaseConfig) -> Result<(), EngineError> {
        self(config)
    }
}

/// Engine handle: a live connection plus the settings used to drive it.
pub struct DatabaseConnection {
    connection: Arc<dyn Connection>,
    config: DatabaseConfig,
}

impl DatabaseConnection {
    /// Wraps `connection` with default settings.
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            config: DatabaseConfig::default(),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DatabaseConfig {
        &mut self.config
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Runs one statement and returns the affected row count.
    pub fn execute(&self, statement: &Statement) -> Result<u64, EngineError> {
        debug!(
            sql = %statement.to_sql(|name| self.config.escape(name)),
            params = ?statement.parameters(),
            "executing statement"
        );
        Ok(self.connection.execute(statement)?)
    }

    /// Primary-key columns for `table`: the configured override if any,
    /// otherwise the connection's metadata.
    pub fn primary_keys(&self, table: &str) -> Result<Vec<String>, EngineError> {
        if let Some(keys) = self.config.primary_keys(table) {
            return Ok(keys.to_vec());
        }
        Ok(self.connection.primary_keys(table)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_pattern_requires_placeholder() {
        let mut config = DatabaseConfig::default();
        let err = config.set_escape_pattern("[]").unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidEscapePattern {
                pattern: "[]".into()
            }
        );
        assert_eq!(config.escape_pattern(), None);
        assert_eq!(config.escape("users"), "users");
    }

    #[test]
    fn escape_pattern_wraps_names() {
        let mut config = DatabaseConfig::default();
        config.set_escape_pattern("\"?\"").unwrap();
        assert_eq!(config.escape("order"), "\"order\"");
    }

    #[test]
    fn data_type_factory_coercions() {
        assert_eq!(DataTypeFactory::MySql.coerce(Value::Bool(true)), Value::Int(1));
        assert_eq!(DataTypeFactory::Oracle.coerce(Value::Bool(false)), Value::Int(0));
        assert_eq!(DataTypeFactory::Oracle.coerce(Value::from("")), Value::Null);
        assert_eq!(DataTypeFactory::MySql.coerce(Value::from("")), Value::from(""));
        assert_eq!(
            DataTypeFactory::Postgresql.coerce(Value::Bool(true)),
            Value::Bool(true)
        );
    }

    #[test]
    fn data_type_factory_from_json() {
        let factory: DataTypeFactory = serde_json::from_str("\"mysql\"").unwrap();
        assert_eq!(factory, DataTypeFactory::MySql);
    }

    #[test]
    fn primary_key_override() {
        let mut config = DatabaseConfig::default();
        config.set_primary_keys("links", ["from_id", "to_id"]);
        assert_eq!(
            config.primary_keys("links"),
            Some(&["from_id".to_string(), "to_id".to_string()][..])
        );
        assert_eq!(config.primary_keys("other"), None);
    }

    #[test]
    fn closure_configurer() {
        let configurer = |config: &mut DatabaseConfig| {
            config.set_allow_empty_fields(true);
            Ok::<(), EngineError>(())
        };
        let mut config = DatabaseConfig::default();
        configurer.configure(&mut config).unwrap();
        assert!(config.allow_empty_fields());
    }
}
