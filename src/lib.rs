//! # dbfixture
//!
//! Loads database fixture datasets before and after test execution.
//!
//! A test harness registers its data sources in a [`Context`], describes each
//! fixture with a [`DataSetConfiguration`], and calls
//! [`DefaultDataLoader::execute`] with [`Phase::Setup`] before the test and
//! [`Phase::Teardown`] after it.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use dbfixture::{Context, DataLoader, DataSetConfiguration, DefaultDataLoader, Phase};
//! use dbfixture::database::{DataSourceRef, ManagedDataSource, MemoryDatabase};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = MemoryDatabase::new();
//! db.create_table("users", &["id", "name"], &["id"])?;
//!
//! let mut context = Context::new();
//! let source: DataSourceRef = Arc::new(ManagedDataSource::new(db.clone()));
//! context.register("dataSource", source)?;
//!
//! let configuration = DataSetConfiguration::from_json_str(r#"{
//!     "data_sets": [[ { "table": "users", "rows": [ { "id": 1, "name": "ada" } ] } ]]
//! }"#)?;
//!
//! DefaultDataLoader.execute(&context, Some(&configuration), Phase::Setup)?;
//! assert_eq!(db.row_count("users")?, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod database;
pub mod dataset;
pub mod engine;
pub mod loader;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{DataSetConfiguration, FixtureConfiguration, Phase};
pub use context::{Context, ResourceLookup};
pub use dataset::{DataSet, Table, Value};
pub use engine::Operation;
pub use loader::{DataLoader, DefaultDataLoader, LoaderError};
