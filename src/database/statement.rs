//! Structured write statements issued by dataset operations.

use std::fmt;

use crate::dataset::Value;

/// A single write against one table.
///
/// Statements stay structured so that in-process backends can apply them
/// directly; SQL drivers render them with [`Statement::to_sql`] and bind
/// [`Statement::parameters`] positionally.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Value>,
    },
    Update {
        table: String,
        columns: Vec<String>,
        values: Vec<Value>,
        key_columns: Vec<String>,
        key_values: Vec<Value>,
    },
    Delete {
        table: String,
        key_columns: Vec<String>,
        key_values: Vec<Value>,
    },
    DeleteAll {
        table: String,
    },
    Truncate {
        table: String,
    },
}

impl Statement {
    /// The table this statement writes to.
    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::DeleteAll { table }
            | Self::Truncate { table } => table,
        }
    }

    /// Positional parameters in placeholder order.
    pub fn parameters(&self) -> Vec<&Value> {
        match self {
            Self::Insert { values, .. } => values.iter().collect(),
            Self::Update {
                values, key_values, ..
            } => values.iter().chain(key_values).collect(),
            Self::Delete { key_values, .. } => key_values.iter().collect(),
            Self::DeleteAll { .. } | Self::Truncate { .. } => Vec::new(),
        }
    }

    /// Renders the statement as `?`-placeholder SQL, passing every table and
    /// column identifier through `escape`.
    ///
    /// # Examples
    ///
    /// ```
    /// use dbfixture::database::Statement;
    ///
    /// let statement = Statement::DeleteAll { table: "users".into() };
    /// assert_eq!(statement.to_sql(|name| format!("\"{name}\"")), "DELETE FROM \"users\"");
    /// ```
    pub fn to_sql<F>(&self, escape: F) -> String
    where
        F: Fn(&str) -> String,
    {
        let list = |names: &[String]| {
            names
                .iter()
                .map(|name| escape(name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let predicate = |names: &[String]| {
            names
                .iter()
                .map(|name| format!("{} = ?", escape(name)))
                .collect::<Vec<_>>()
                .join(" AND ")
        };

        match self {
            Self::Insert { table, columns, .. } => {
                let placeholders = vec!["?"; columns.len()].join(", ");
                format!(
                    "INSERT INTO {} ({}) VALUES ({placeholders})",
                    escape(table),
                    list(columns)
                )
            }
            Self::Update {
                table,
                columns,
                key_columns,
                ..
            } => {
                let assignments = columns
                    .iter()
                    .map(|name| format!("{} = ?", escape(name)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "UPDATE {} SET {assignments} WHERE {}",
                    escape(table),
                    predicate(key_columns)
                )
            }
            Self::Delete {
                table, key_columns, ..
            } => format!(
                "DELETE FROM {} WHERE {}",
                escape(table),
                predicate(key_columns)
            ),
            Self::DeleteAll { table } => format!("DELETE FROM {}", escape(table)),
            Self::Truncate { table } => format!("TRUNCATE TABLE {}", escape(table)),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql(str::to_owned))
    }
}
