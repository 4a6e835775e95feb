//! Fixture loading — applies a configured dataset operation for one
//! lifecycle phase.
//!
//! [`DefaultDataLoader::execute`] runs one linear sequence:
//!
//! 1. Resolve the data source from the context, by name when the
//!    configuration gives one, otherwise as the unique [`DataSourceRef`].
//! 2. Ask the phase which operation to run and fetch the dataset.
//! 3. Acquire a connection, which joins the ambient transaction if any.
//! 4. Wrap it in a [`DatabaseConnection`], let the configuration tune the
//!    engine, and execute the operation.
//! 5. On every exit path, release the connection unless it belongs to a
//!    transaction, whose owner releases it instead.
//!
//! ```
//! use std::sync::Arc;
//! use dbfixture::config::{DataSetConfiguration, Phase};
//! use dbfixture::context::Context;
//! use dbfixture::database::{DataSourceRef, ManagedDataSource, MemoryDatabase};
//! use dbfixture::dataset::{DataSet, Table, Value};
//! use dbfixture::engine::Operation;
//! use dbfixture::loader::{DataLoader, DefaultDataLoader};
//!
//! let db = MemoryDatabase::new();
//! db.create_table("users", &["id", "name"], &["id"]).unwrap();
//!
//! let mut context = Context::new();
//! let source: DataSourceRef = Arc::new(ManagedDataSource::new(db.clone()));
//! context.register("dataSource", source).unwrap();
//!
//! let users = Table::new("users", ["id", "name"])
//!     .unwrap()
//!     .with_row([Value::from(1), Value::from("ada")])
//!     .unwrap();
//! let configuration = DataSetConfiguration::new()
//!     .with_teardown_operation(Operation::DeleteAll)
//!     .with_data_set(DataSet::new().with_table(users));
//!
//! let loader = DefaultDataLoader;
//! loader.execute(&context, Some(&configuration), Phase::Setup).unwrap();
//! assert_eq!(db.row_count("users").unwrap(), 1);
//!
//! loader.execute(&context, Some(&configuration), Phase::Teardown).unwrap();
//! assert_eq!(db.row_count("users").unwrap(), 0);
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, FixtureConfiguration, Phase};
use crate::context::{ContextError, ResourceLookup};
use crate::database::{Connection, DataSource, DataSourceRef, DatabaseError};
use crate::dataset::DataSet;
use crate::engine::{
    DatabaseConnection, DatabaseConnectionConfigurer, EngineError, Operation, OperationReport,
};

/// Errors produced by a fixture load. Each variant carries the
/// collaborator's error unchanged.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("data source lookup failed: {0}")]
    Lookup(#[from] ContextError),

    #[error("dataset unavailable: {0}")]
    DataSet(#[from] ConfigError),

    #[error("connection failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("dataset operation failed: {0}")]
    Engine(#[from] EngineError),
}

/// Loads fixture datasets around test execution.
pub trait DataLoader {
    /// Applies the operation `configuration` assigns to `phase`.
    ///
    /// A `None` configuration is a no-op: nothing is looked up, acquired, or
    /// written.
    fn execute<L, C>(
        &self,
        context: &L,
        configuration: Option<&C>,
        phase: Phase,
    ) -> Result<(), LoaderError>
    where
        L: ResourceLookup,
        C: FixtureConfiguration + ?Sized;
}

/// The standard [`DataLoader`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDataLoader;

impl DataLoader for DefaultDataLoader {
    fn execute<L, C>(
        &self,
        context: &L,
        configuration: Option<&C>,
        phase: Phase,
    ) -> Result<(), LoaderError>
    where
        L: ResourceLookup,
        C: FixtureConfiguration + ?Sized,
    {
        let Some(configuration) = configuration else {
            debug!(%phase, "no dataset configured, skipping");
            return Ok(());
        };

        let data_source = lookup_data_source(context, configuration)?;
        let operation = phase.operation(configuration);
        let data_set = configuration.data_set()?;

        let report =
            execute_operation(operation, &data_set, configuration, data_source.as_ref())?;

        info!(
            %phase,
            data_source = configuration.data_source_name().unwrap_or("<unique>"),
            %operation,
            tables = report.tables,
            rows = report.rows_affected,
            "fixture applied"
        );
        Ok(())
    }
}

// Named lookup when the configuration names a data source, unique otherwise.
fn lookup_data_source<L, C>(context: &L, configuration: &C) -> Result<DataSourceRef, ContextError>
where
    L: ResourceLookup,
    C: FixtureConfiguration + ?Sized,
{
    match configuration.data_source_name() {
        Some(name) => context.lookup_named::<DataSourceRef>(name),
        None => context.lookup::<DataSourceRef>(),
    }
}

fn execute_operation<C>(
    operation: Operation,
    data_set: &DataSet,
    configurer: &C,
    data_source: &dyn DataSource,
) -> Result<OperationReport, LoaderError>
where
    C: DatabaseConnectionConfigurer + ?Sized,
{
    let mut guard = ConnectionGuard::new(data_source);
    let connection = guard.acquire()?;

    let mut handle = DatabaseConnection::new(connection);
    configurer.configure(handle.config_mut())?;

    Ok(operation.execute(&handle, data_set)?)
}

/// Holds an acquired connection and settles it on drop: released back to
/// the data source, or left open when a transaction owns it.
struct ConnectionGuard<'a> {
    data_source: &'a dyn DataSource,
    connection: Option<Arc<dyn Connection>>,
}

impl<'a> ConnectionGuard<'a> {
    fn new(data_source: &'a dyn DataSource) -> Self {
        Self {
            data_source,
            connection: None,
        }
    }

    fn acquire(&mut self) -> Result<Arc<dyn Connection>, DatabaseError> {
        let connection = self.data_source.acquire()?;
        self.connection = Some(Arc::clone(&connection));
        Ok(connection)
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        if self.data_source.is_transactional(&connection) {
            debug!("connection belongs to an active transaction, leaving it open");
            return;
        }

        if let Err(e) = self.data_source.release(connection) {
            warn!(error = %e, "failed to release connection");
        }
    }
}
