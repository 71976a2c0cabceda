/// Where-clause predicates
///
/// A predicate is an ordered conjunction of `column = value` and
/// `column IS NULL` conditions. Ranges, `IN` lists and inequalities are not
/// part of the grammar; `Condition` is where they would be added.
use super::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(Value),
    IsNull,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: Vec<(String, Condition)>,
}

impl Predicate {
    pub fn new() -> Self {
        Predicate::default()
    }

    /// Requires `column` to equal `value`. A `Null` value means `IS NULL`.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let condition = match value.into() {
            Value::Null => Condition::IsNull,
            v => Condition::Equals(v),
        };
        self.conditions.push((column.into(), condition));
        self
    }

    /// Requires `column` to be NULL.
    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push((column.into(), Condition::IsNull));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[(String, Condition)] {
        &self.conditions
    }
}
