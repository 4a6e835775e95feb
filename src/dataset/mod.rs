//! Dataset model — tables of rows to load into, or clean out of, a database.
//!
//! A [`DataSet`] is an ordered list of [`Table`]s. Table order is the load
//! order: insert-style operations walk it front to back, delete-style
//! operations back to front, so parents can be listed before their children.
//!
//! ## JSON form
//!
//! ```json
//! [
//!   { "table": "users", "rows": [ { "id": 1, "name": "ada" } ] },
//!   { "table": "posts", "rows": [ { "id": 10, "user_id": 1 } ] }
//! ]
//! ```
//!
//! A table may declare `"columns"` up front; otherwise its column list is
//! the union of the keys of its rows. Columns keep document order: declared
//! columns first, then row keys in order of first appearance. Cells a row
//! does not mention are [`Value::Null`]. A table named more than once is
//! merged, with later rows appended to the first occurrence.

use std::fmt;

use bytes::Bytes;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced while building a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataSetError {
    #[error("table '{table}' has {expected} columns but a row has {actual} values")]
    RowWidth {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("table '{table}' declares column '{column}' more than once")]
    DuplicateColumn { table: String, column: String },
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Bytes),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// Serialized shape of a table: rows keyed by column name.
#[derive(Serialize, Deserialize)]
struct RawTable {
    table: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<RawRow>,
}

// One row as `(column, value)` pairs in document order.
struct RawRow(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for RawRow {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = RawRow;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column names to values")
            }

            fn visit_map<A>(self, mut map: A) -> Result<RawRow, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut cells = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(cell) = map.next_entry::<String, Value>()? {
                    cells.push(cell);
                }
                Ok(RawRow(cells))
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

impl Serialize for RawRow {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (column, value) in &self.0 {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// A named table with an ordered column list and positional rows.
///
/// # Examples
///
/// ```
/// use dbfixture::dataset::{Table, Value};
///
/// let mut users = Table::new("users", ["id", "name"]).unwrap();
/// users.push_row([Value::from(1), Value::from("ada")]).unwrap();
///
/// assert_eq!(users.len(), 1);
/// assert_eq!(users.value(0, "name"), Some(&Value::from("ada")));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable", into = "RawTable")]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Creates an empty table with the given columns.
    ///
    /// # Errors
    ///
    /// Returns [`DataSetError::DuplicateColumn`] if a column name repeats.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Result<Self, DataSetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let mut unique: Vec<String> = Vec::new();
        for column in columns {
            let column = column.into();
            if unique.contains(&column) {
                return Err(DataSetError::DuplicateColumn {
                    table: name,
                    column,
                });
            }
            unique.push(column);
        }

        Ok(Self {
            name,
            columns: unique,
            rows: Vec::new(),
        })
    }

    /// Appends a row. The row must carry exactly one value per column.
    pub fn push_row<I, V>(&mut self, values: I) -> Result<(), DataSetError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let row: Vec<Value> = values.into_iter().map(Into::into).collect();
        if row.len() != self.columns.len() {
            return Err(DataSetError::RowWidth {
                table: self.name.clone(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Builder form of [`push_row`](Self::push_row).
    pub fn with_row<I, V>(mut self, values: I) -> Result<Self, DataSetError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_row(values)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `column` in the column list.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// The cell at `row` in `column`, if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    // Appends the rows of `other`, widening both sides to the union of columns.
    fn absorb(&mut self, other: Table) {
        for column in &other.columns {
            if self.column_index(column).is_none() {
                self.columns.push(column.clone());
                for row in &mut self.rows {
                    row.push(Value::Null);
                }
            }
        }

        for row in other.rows {
            let mut widened = vec![Value::Null; self.columns.len()];
            for (column, value) in other.columns.iter().zip(row) {
                if let Some(index) = self.column_index(column) {
                    widened[index] = value;
                }
            }
            self.rows.push(widened);
        }
    }
}

impl TryFrom<RawTable> for Table {
    type Error = DataSetError;

    fn try_from(raw: RawTable) -> Result<Self, DataSetError> {
        let mut table = Table::new(raw.table, raw.columns)?;
        for RawRow(cells) in &raw.rows {
            for (column, _) in cells {
                if table.column_index(column).is_none() {
                    table.columns.push(column.clone());
                }
            }
        }

        for RawRow(cells) in raw.rows {
            let mut row = vec![Value::Null; table.columns.len()];
            for (column, value) in cells {
                if let Some(index) = table.column_index(&column) {
                    row[index] = value;
                }
            }
            table.rows.push(row);
        }
        Ok(table)
    }
}

impl From<Table> for RawTable {
    fn from(table: Table) -> Self {
        let rows = table
            .rows
            .into_iter()
            .map(|row| RawRow(table.columns.iter().cloned().zip(row).collect()))
            .collect();

        Self {
            table: table.name,
            columns: table.columns,
            rows,
        }
    }
}

/// An ordered collection of tables, each name appearing once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Table>", into = "Vec<Table>")]
pub struct DataSet {
    tables: Vec<Table>,
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `table`, merging it into an existing table of the same name.
    pub fn with_table(mut self, table: Table) -> Self {
        self.add_table(table);
        self
    }

    /// Adds `table`, merging it into an existing table of the same name.
    pub fn add_table(&mut self, table: Table) {
        match self.tables.iter_mut().find(|t| t.name == table.name) {
            Some(existing) => existing.absorb(table),
            None => self.tables.push(table),
        }
    }

    /// Combines two datasets: `other`'s tables follow `self`'s, and tables
    /// present in both have `other`'s rows appended.
    pub fn compose(mut self, other: DataSet) -> Self {
        for table in other.tables {
            self.add_table(table);
        }
        self
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Table names in load order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Total number of rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(Table::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl From<Vec<Table>> for DataSet {
    fn from(tables: Vec<Table>) -> Self {
        tables.into_iter().fold(Self::new(), Self::with_table)
    }
}

impl From<DataSet> for Vec<Table> {
    fn from(data_set: DataSet) -> Self {
        data_set.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Table {
        Table::new("users", ["id", "name"])
            .unwrap()
            .with_row([Value::from(1), Value::from("ada")])
            .unwrap()
    }

    // ── Table ─────────────────────────────────────────────────────────────────

    #[test]
    fn duplicate_column_rejected() {
        let err = Table::new("t", ["a", "a"]).unwrap_err();
        assert_eq!(
            err,
            DataSetError::DuplicateColumn {
                table: "t".into(),
                column: "a".into()
            }
        );
    }

    #[test]
    fn row_width_checked() {
        let mut table = Table::new("t", ["a", "b"]).unwrap();
        let err = table.push_row([Value::from(1)]).unwrap_err();
        assert!(matches!(
            err,
            DataSetError::RowWidth {
                expected: 2,
                actual: 1,
                ..
            }
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn value_lookup_by_column() {
        let table = users();
        assert_eq!(table.value(0, "id"), Some(&Value::Int(1)));
        assert_eq!(table.value(0, "missing"), None);
        assert_eq!(table.value(3, "id"), None);
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }

    // ── DataSet ───────────────────────────────────────────────────────────────

    #[test]
    fn compose_appends_rows_and_widens_columns() {
        let first = DataSet::new().with_table(users());
        let extra = Table::new("users", ["id", "email"])
            .unwrap()
            .with_row([Value::from(2), Value::from("b@example.com")])
            .unwrap();
        let second = DataSet::new()
            .with_table(extra)
            .with_table(Table::new("posts", ["id"]).unwrap());

        let combined = first.compose(second);

        assert_eq!(combined.table_names(), vec!["users", "posts"]);
        let table = combined.table("users").unwrap();
        assert_eq!(table.columns(), &["id", "name", "email"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.value(0, "email"), Some(&Value::Null));
        assert_eq!(table.value(1, "name"), Some(&Value::Null));
        assert_eq!(table.value(1, "email"), Some(&Value::from("b@example.com")));
        assert_eq!(combined.row_count(), 2);
    }

    // ── JSON form ─────────────────────────────────────────────────────────────

    #[test]
    fn json_rows_fill_missing_cells_with_null() {
        let json = r#"[
            { "table": "users", "rows": [
                { "id": 1, "name": "ada", "active": true },
                { "id": 2, "score": 1.5 }
            ] },
            { "table": "empty" }
        ]"#;
        let data_set: DataSet = serde_json::from_str(json).unwrap();

        assert_eq!(data_set.table_names(), vec!["users", "empty"]);
        let users = data_set.table("users").unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users.value(0, "active"), Some(&Value::Bool(true)));
        assert_eq!(users.value(1, "name"), Some(&Value::Null));
        assert_eq!(users.value(1, "score"), Some(&Value::Float(1.5)));
        assert!(data_set.table("empty").unwrap().is_empty());
    }

    #[test]
    fn json_repeated_table_is_merged() {
        let json = r#"[
            { "table": "users", "rows": [{ "id": 1 }] },
            { "table": "posts", "rows": [{ "id": 10 }] },
            { "table": "users", "rows": [{ "id": 2, "name": "grace" }] }
        ]"#;
        let data_set: DataSet = serde_json::from_str(json).unwrap();

        assert_eq!(data_set.table_names(), vec!["users", "posts"]);
        let users = data_set.table("users").unwrap();
        assert_eq!(users.columns(), &["id", "name"]);
        assert_eq!(users.len(), 2);
        assert_eq!(users.value(0, "name"), Some(&Value::Null));
        assert_eq!(users.value(1, "id"), Some(&Value::Int(2)));
        assert_eq!(data_set.row_count(), 3);
    }

    #[test]
    fn json_columns_follow_document_order() {
        let json = r#"[{ "table": "users", "columns": ["name"], "rows": [
            { "zeta": 1, "id": 2, "name": "ada" },
            { "alpha": true }
        ] }]"#;
        let data_set: DataSet = serde_json::from_str(json).unwrap();

        let users = data_set.table("users").unwrap();
        assert_eq!(users.columns(), &["name", "zeta", "id", "alpha"]);
        assert_eq!(
            users.rows()[0],
            vec![Value::from("ada"), Value::Int(1), Value::Int(2), Value::Null]
        );
    }

    #[test]
    fn json_keeps_columns_of_empty_table() {
        let data_set = DataSet::new().with_table(Table::new("t", ["b", "a"]).unwrap());

        let json = serde_json::to_string(&data_set).unwrap();
        let back: DataSet = serde_json::from_str(&json).unwrap();

        assert_eq!(back, data_set);
        assert_eq!(back.table("t").unwrap().columns(), &["b", "a"]);
    }

    #[test]
    fn json_duplicate_declared_column_rejected() {
        let json = r#"[{ "table": "t", "columns": ["a", "a"] }]"#;
        let err = serde_json::from_str::<DataSet>(json).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn json_explicit_null_is_null() {
        let json = r#"[{ "table": "t", "rows": [{ "a": null }] }]"#;
        let data_set: DataSet = serde_json::from_str(json).unwrap();
        assert_eq!(data_set.table("t").unwrap().value(0, "a"), Some(&Value::Null));
    }
}
