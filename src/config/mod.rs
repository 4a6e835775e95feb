//! Fixture configuration — which dataset to load, into which data source, and
//! with which operation per lifecycle [`Phase`].
//!
//! [`DataSetConfiguration`] is built in code or read from JSON:
//!
//! ```json
//! {
//!   "data_source_name": "secondary",
//!   "setup_operation": "CLEAN_INSERT",
//!   "teardown_operation": "DELETE_ALL",
//!   "data_sets": [
//!     "fixtures/users.json",
//!     [ { "table": "tags", "rows": [ { "label": "rust" } ] } ]
//!   ],
//!   "escape_pattern": "\"?\"",
//!   "data_type_factory": "postgresql",
//!   "allow_empty_fields": false,
//!   "primary_keys": { "tags": ["label"] }
//! }
//! ```
//!
//! Every field is optional except `data_sets`, which must name at least one
//! source by the time the dataset is loaded. Relative file paths resolve
//! against the directory of the configuration file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dataset::DataSet;
use crate::engine::{
    DataTypeFactory, DatabaseConfig, DatabaseConnectionConfigurer, EngineError, Operation,
};

/// Errors produced while reading configuration or dataset files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no dataset configured")]
    NoDataSet,
}

/// The lifecycle point at which a dataset operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Setup,
    Teardown,
}

impl Phase {
    /// Selects the operation `configuration` assigns to this phase.
    pub fn operation<C>(self, configuration: &C) -> Operation
    where
        C: FixtureConfiguration + ?Sized,
    {
        match self {
            Self::Setup => configuration.setup_operation(),
            Self::Teardown => configuration.teardown_operation(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => f.write_str("SETUP"),
            Self::Teardown => f.write_str("TEARDOWN"),
        }
    }
}

/// What the fixture loader needs to know about one fixture.
pub trait FixtureConfiguration: DatabaseConnectionConfigurer {
    /// Name of the data source to load into, or `None` for the only one.
    fn data_source_name(&self) -> Option<&str>;

    fn setup_operation(&self) -> Operation;

    fn teardown_operation(&self) -> Operation;

    /// The dataset content. May read files, so it can fail.
    fn data_set(&self) -> Result<DataSet, ConfigError>;
}

/// Where a dataset comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataSetSource {
    /// A JSON dataset file.
    File(PathBuf),
    /// A dataset given in place.
    Inline(DataSet),
}

/// The standard [`FixtureConfiguration`].
///
/// Defaults: no data source name, `CLEAN_INSERT` on setup, `NONE` on
/// teardown, default engine settings.
///
/// # Examples
///
/// ```
/// use dbfixture::config::{DataSetConfiguration, FixtureConfiguration, Phase};
/// use dbfixture::dataset::{DataSet, Table};
/// use dbfixture::engine::Operation;
///
/// let users = Table::new("users", ["id"]).unwrap().with_row([1]).unwrap();
/// let configuration = DataSetConfiguration::new()
///     .with_data_source("secondary")
///     .with_teardown_operation(Operation::DeleteAll)
///     .with_data_set(DataSet::new().with_table(users));
///
/// assert_eq!(configuration.data_source_name(), Some("secondary"));
/// assert_eq!(Phase::Setup.operation(&configuration), Operation::CleanInsert);
/// assert_eq!(Phase::Teardown.operation(&configuration), Operation::DeleteAll);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSetConfiguration {
    data_source_name: Option<String>,
    setup_operation: Operation,
    teardown_operation: Operation,
    data_sets: Vec<DataSetSource>,
    escape_pattern: Option<String>,
    data_type_factory: DataTypeFactory,
    allow_empty_fields: bool,
    primary_keys: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for DataSetConfiguration {
    fn default() -> Self {
        Self {
            data_source_name: None,
            setup_operation: Operation::CleanInsert,
            teardown_operation: Operation::None,
            data_sets: Vec::new(),
            escape_pattern: None,
            data_type_factory: DataTypeFactory::Default,
            allow_empty_fields: false,
            primary_keys: BTreeMap::new(),
            base_dir: None,
        }
    }
}

impl DataSetConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON. Relative dataset paths resolve
    /// against the working directory.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            origin: "configuration".to_owned(),
            source,
        })
    }

    /// Reads a configuration file. Relative dataset paths resolve against
    /// the file's directory.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = read(path)?;
        let mut configuration: Self =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                origin: path.display().to_string(),
                source,
            })?;
        configuration.base_dir = path.parent().map(Path::to_path_buf);
        Ok(configuration)
    }

    pub fn with_data_source(mut self, name: impl Into<String>) -> Self {
        self.data_source_name = Some(name.into());
        self
    }

    pub fn with_setup_operation(mut self, operation: Operation) -> Self {
        self.setup_operation = operation;
        self
    }

    pub fn with_teardown_operation(mut self, operation: Operation) -> Self {
        self.teardown_operation = operation;
        self
    }

    /// Adds an inline dataset. Sources compose in the order they are added.
    pub fn with_data_set(mut self, data_set: DataSet) -> Self {
        self.data_sets.push(DataSetSource::Inline(data_set));
        self
    }

    /// Adds a JSON dataset file. Sources compose in the order they are added.
    pub fn with_data_set_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_sets.push(DataSetSource::File(path.into()));
        self
    }

    /// Identifier escape pattern; validated when the engine is configured.
    pub fn with_escape_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.escape_pattern = Some(pattern.into());
        self
    }

    pub fn with_data_type_factory(mut self, factory: DataTypeFactory) -> Self {
        self.data_type_factory = factory;
        self
    }

    pub fn with_allow_empty_fields(mut self, allow: bool) -> Self {
        self.allow_empty_fields = allow;
        self
    }

    pub fn with_primary_keys<I, S>(mut self, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys
            .insert(table.into(), columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn sources(&self) -> &[DataSetSource] {
        &self.data_sets
    }

    fn load(&self, source: &DataSetSource) -> Result<DataSet, ConfigError> {
        match source {
            DataSetSource::Inline(data_set) => Ok(data_set.clone()),
            DataSetSource::File(file) => {
                let path = match &self.base_dir {
                    Some(dir) => dir.join(file),
                    None => file.clone(),
                };
                debug!(path = %path.display(), "loading dataset file");
                let text = read(&path)?;
                serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                    origin: path.display().to_string(),
                    source,
                })
            }
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl DatabaseConnectionConfigurer for DataSetConfiguration {
    fn configure(&self, config: &mut DatabaseConfig) -> Result<(), EngineError> {
        if let Some(pattern) = &self.escape_pattern {
            config.set_escape_pattern(pattern.as_str())?;
        }
        config.set_data_type_factory(self.data_type_factory);
        config.set_allow_empty_fields(self.allow_empty_fields);
        for (table, columns) in &self.primary_keys {
            config.set_primary_keys(table.as_str(), columns.iter().map(String::as_str));
        }
        Ok(())
    }
}

impl FixtureConfiguration for DataSetConfiguration {
    fn data_source_name(&self) -> Option<&str> {
        self.data_source_name.as_deref()
    }

    fn setup_operation(&self) -> Operation {
        self.setup_operation
    }

    fn teardown_operation(&self) -> Operation {
        self.teardown_operation
    }

    fn data_set(&self) -> Result<DataSet, ConfigError> {
        let (first, rest) = self.data_sets.split_first().ok_or(ConfigError::NoDataSet)?;
        let mut data_set = self.load(first)?;
        for source in rest {
            data_set = data_set.compose(self.load(source)?);
        }
        Ok(data_set)
    }
}
