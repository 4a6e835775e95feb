//! Dataset operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DatabaseConnection, EngineError};
use crate::database::Statement;
use crate::dataset::{DataSet, Table, Value};

/// An action applied to every table of a dataset.
///
/// | Operation        | Table order | Effect                                        |
/// |------------------|-------------|-----------------------------------------------|
/// | `NONE`           | —           | nothing                                       |
/// | `INSERT`         | forward     | insert every row                              |
/// | `UPDATE`         | forward     | update every row by primary key               |
/// | `REFRESH`        | forward     | update by primary key, insert when missing    |
/// | `DELETE`         | reverse     | delete the dataset's rows by primary key      |
/// | `DELETE_ALL`     | reverse     | delete every row of each table                |
/// | `TRUNCATE_TABLE` | reverse     | truncate each table                           |
/// | `CLEAN_INSERT`   | both        | `DELETE_ALL` then `INSERT`                    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    None,
    Insert,
    Update,
    Refresh,
    Delete,
    DeleteAll,
    TruncateTable,
    CleanInsert,
}

impl Operation {
    /// Returns the canonical upper-case name, e.g. `"CLEAN_INSERT"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Refresh => "REFRESH",
            Self::Delete => "DELETE",
            Self::DeleteAll => "DELETE_ALL",
            Self::TruncateTable => "TRUNCATE_TABLE",
            Self::CleanInsert => "CLEAN_INSERT",
        }
    }

    /// Applies this operation to `data_set` through `connection`.
    ///
    /// Statements run one at a time; the first failure is returned and the
    /// remaining statements are skipped.
    pub fn execute(
        self,
        connection: &DatabaseConnection,
        data_set: &DataSet,
    ) -> Result<OperationReport, EngineError> {
        let tables = data_set.tables();
        let mut report = OperationReport::new(self);

        match self {
            Self::None => {}
            Self::Insert => {
                for table in tables {
                    report.record(insert_rows(connection, table)?);
                }
            }
            Self::Update => {
                for table in tables {
                    report.record(update_rows(connection, table, self, false)?);
                }
            }
            Self::Refresh => {
                for table in tables {
                    report.record(update_rows(connection, table, self, true)?);
                }
            }
            Self::Delete => {
                for table in tables.iter().rev() {
                    report.record(delete_rows(connection, table)?);
                }
            }
            Self::DeleteAll | Self::TruncateTable => {
                for table in tables.iter().rev() {
                    let name = table.name().to_owned();
                    let statement = if self == Self::DeleteAll {
                        Statement::DeleteAll { table: name }
                    } else {
                        Statement::Truncate { table: name }
                    };
                    report.record(connection.execute(&statement)?);
                }
            }
            Self::CleanInsert => {
                let cleaned = Self::DeleteAll.execute(connection, data_set)?;
                let inserted = Self::Insert.execute(connection, data_set)?;
                report.tables = inserted.tables;
                report.rows_affected = cleaned.rows_affected + inserted.rows_affected;
            }
        }

        debug!(
            operation = %self,
            tables = report.tables,
            rows = report.rows_affected,
            "operation applied"
        );
        Ok(report)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful [`Operation::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationReport {
    pub operation: Operation,
    /// Number of tables visited.
    pub tables: usize,
    /// Sum of affected-row counts reported by the connection.
    pub rows_affected: u64,
}

impl OperationReport {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            tables: 0,
            rows_affected: 0,
        }
    }

    fn record(&mut self, rows: u64) {
        self.tables += 1;
        self.rows_affected += rows;
    }
}

// Validates and converts one dataset row for writing.
fn prepare_row(
    connection: &DatabaseConnection,
    table: &Table,
    index: usize,
    row: &[Value],
) -> Result<Vec<Value>, EngineError> {
    let config = connection.config();
    table
        .columns()
        .iter()
        .zip(row)
        .map(|(column, value)| {
            if !config.allow_empty_fields() && matches!(value, Value::Text(s) if s.is_empty()) {
                return Err(EngineError::EmptyField {
                    table: table.name().to_owned(),
                    row: index,
                    column: column.clone(),
                });
            }
            Ok(config.data_type_factory().coerce(value.clone()))
        })
        .collect()
}

// Positions of the primary-key columns within the dataset table.
fn key_positions(
    connection: &DatabaseConnection,
    table: &Table,
    operation: Operation,
) -> Result<(Vec<String>, Vec<usize>), EngineError> {
    let keys = connection.primary_keys(table.name())?;
    if keys.is_empty() {
        return Err(EngineError::MissingPrimaryKey {
            table: table.name().to_owned(),
            operation,
        });
    }

    let positions = keys
        .iter()
        .map(|key| {
            table
                .column_index(key)
                .ok_or_else(|| EngineError::MissingKeyColumn {
                    table: table.name().to_owned(),
                    column: key.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((keys, positions))
}

fn insert_rows(connection: &DatabaseConnection, table: &Table) -> Result<u64, EngineError> {
    let mut affected = 0;
    for (index, row) in table.rows().iter().enumerate() {
        let statement = Statement::Insert {
            table: table.name().to_owned(),
            columns: table.columns().to_vec(),
            values: prepare_row(connection, table, index, row)?,
        };
        affected += connection.execute(&statement)?;
    }
    Ok(affected)
}

fn update_rows(
    connection: &DatabaseConnection,
    table: &Table,
    operation: Operation,
    insert_missing: bool,
) -> Result<u64, EngineError> {
    let (key_columns, positions) = key_positions(connection, table, operation)?;
    let set_columns: Vec<String> = table
        .columns()
        .iter()
        .filter(|column| !key_columns.contains(*column))
        .cloned()
        .collect();

    let mut affected = 0;
    for (index, row) in table.rows().iter().enumerate() {
        let values = prepare_row(connection, table, index, row)?;
        let key_values: Vec<Value> = positions.iter().map(|&i| values[i].clone()).collect();
        let set_values: Vec<Value> = values
            .iter()
            .enumerate()
            .filter(|(i, _)| !positions.contains(i))
            .map(|(_, value)| value.clone())
            .collect();

        let statement = Statement::Update {
            table: table.name().to_owned(),
            columns: set_columns.clone(),
            values: set_values,
            key_columns: key_columns.clone(),
            key_values,
        };
        let updated = connection.execute(&statement)?;

        if updated > 0 {
            affected += updated;
        } else if insert_missing {
            let statement = Statement::Insert {
                table: table.name().to_owned(),
                columns: table.columns().to_vec(),
                values,
            };
            affected += connection.execute(&statement)?;
        } else {
            return Err(EngineError::RowNotFound {
                table: table.name().to_owned(),
                row: index,
            });
        }
    }
    Ok(affected)
}

fn delete_rows(connection: &DatabaseConnection, table: &Table) -> Result<u64, EngineError> {
    let (key_columns, positions) = key_positions(connection, table, Operation::Delete)?;

    let mut affected = 0;
    for (index, row) in table.rows().iter().enumerate().rev() {
        let values = prepare_row(connection, table, index, row)?;
        let statement = Statement::Delete {
            table: table.name().to_owned(),
            key_columns: key_columns.clone(),
            key_values: positions.iter().map(|&i| values[i].clone()).collect(),
        };
        affected += connection.execute(&statement)?;
    }
    Ok(affected)
}
