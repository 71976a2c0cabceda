/// Values and Tabular Results
///
/// `Value` is the tagged scalar every query returns and every insert consumes.
/// `TabularResult` is an ordered set of named columns plus rows of values.
use crate::core::{EtlDbError, Result};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// A scalar database value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Renders the value as one field of a tab-delimited staging file.
    ///
    /// The load format has no quoting or escaping, so text containing a field
    /// or row terminator cannot be staged. `Null` becomes an empty field.
    pub fn staging_field(&self) -> Result<Cow<'_, str>> {
        match self {
            Value::Text(s) => {
                if s.contains(['\t', '\n', '\r']) {
                    return Err(EtlDbError::Staging(format!(
                        "text value {:?} contains a tab or line break",
                        s
                    )));
                }
                Ok(Cow::Borrowed(s))
            }
            Value::Integer(i) => Ok(Cow::Owned(i.to_string())),
            Value::Float(f) if f.is_finite() => Ok(Cow::Owned(f.to_string())),
            Value::Float(f) => Err(EtlDbError::Staging(format!(
                "non-finite float {} cannot be loaded",
                f
            ))),
            Value::Null => Ok(Cow::Borrowed("")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Null => write!(f, "NULL"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Rows and named columns returned by a query or handed to an insert.
///
/// Every row has exactly one value per column. Column lookups by name are
/// case-insensitive, matching how the catalog treats identifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TabularResult {
    /// Creates a result, checking that every row matches the column count.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(EtlDbError::Query(format!(
                "row {} has {} values but there are {} columns",
                i,
                row.len(),
                columns.len()
            )));
        }
        Ok(TabularResult { columns, rows })
    }

    /// A result with neither columns nor rows.
    pub fn empty() -> Self {
        TabularResult::default()
    }

    /// A schema-shaped result with no rows.
    pub fn with_columns(columns: Vec<String>) -> Self {
        TabularResult {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows, whatever the columns.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, compared case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = fold_case(name);
        self.columns.iter().position(|c| fold_case(c) == name)
    }

    /// Value of `column` in row `row`.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// All values of one column, top to bottom.
    pub fn column_values(&self, column: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Collapses a lone NULL cell into an empty result.
    ///
    /// Callers branch on emptiness, and an aggregate over no rows comes back
    /// as one NULL cell; both must read as "nothing".
    pub fn normalize_single_null(self) -> Self {
        if self.columns.len() == 1 && self.rows.len() == 1 && self.rows[0][0].is_null() {
            TabularResult::empty()
        } else {
            self
        }
    }

    /// Replaces the column names, keeping the values.
    pub fn relabel(self, columns: Vec<String>) -> Result<Self> {
        if columns.len() != self.columns.len() {
            return Err(EtlDbError::Query(format!(
                "expected {} columns but the statement returned {}",
                columns.len(),
                self.columns.len()
            )));
        }
        Ok(TabularResult {
            columns,
            rows: self.rows,
        })
    }

    /// Reorders columns to `target`, matching names case-insensitively.
    ///
    /// The returned result carries the `target` spelling of each column.
    /// Columns of `target` missing here, columns here absent from `target`,
    /// and names appearing twice here all make the call fail.
    pub fn reorder_to(&self, table: &str, target: &[String]) -> Result<TabularResult> {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut unexpected = Vec::new();
        for (i, column) in self.columns.iter().enumerate() {
            if positions.insert(fold_case(column), i).is_some() {
                unexpected.push(column.clone());
            }
        }

        let mut order = Vec::with_capacity(target.len());
        let mut missing = Vec::new();
        for column in target {
            match positions.remove(&fold_case(column)) {
                Some(i) => order.push(i),
                None => missing.push(column.clone()),
            }
        }

        let mut leftover: Vec<usize> = positions.into_values().collect();
        leftover.sort_unstable();
        unexpected.extend(leftover.into_iter().map(|i| self.columns[i].clone()));

        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(EtlDbError::ColumnMismatch {
                table: table.to_string(),
                missing,
                unexpected,
            });
        }

        let rows = self
            .rows
            .iter()
            .map(|row| order.iter().map(|&i| row[i].clone()).collect())
            .collect();

        Ok(TabularResult {
            columns: target.to_vec(),
            rows,
        })
    }
}

/// Case folding shared by column lookups and catalog alignment.
fn fold_case(name: &str) -> String {
    name.to_lowercase()
}

/// Serializes as a list of `{column: value}` records.
impl Serialize for TabularResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        struct Record<'a> {
            columns: &'a [String],
            values: &'a [Value],
        }

        impl Serialize for Record<'_> {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.columns.len()))?;
                for (column, value) in self.columns.iter().zip(self.values) {
                    map.serialize_entry(column, value)?;
                }
                map.end()
            }
        }

        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&Record {
                columns: &self.columns,
                values: row,
            })?;
        }
        seq.end()
    }
}
