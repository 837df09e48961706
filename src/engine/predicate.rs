use crate::model::{ColumnRef, GenericColumns};
use serde::{Deserialize, Serialize};

/// Literal value in a predicate or a property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl PropertyValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(value) => Some(*value),
            PropertyValue::Bool(value) => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(value) => Some(*value),
            PropertyValue::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Substring match, text slots only.
    Contains,
}

/// Predicate against domain properties, built by callers in place of the
/// source system's expression trees. Strategies lower it to a
/// [`ColumnPredicate`]; after materialization the engine re-checks the
/// original predicate against the domain object, so a faulty translation
/// can only drop rows, never leak wrong ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyPredicate {
    All(Vec<PropertyPredicate>),
    Any(Vec<PropertyPredicate>),
    Compare {
        property: String,
        op: CompareOp,
        value: PropertyValue,
    },
}

impl PropertyPredicate {
    pub fn eq(property: impl Into<String>, value: PropertyValue) -> Self {
        Self::Compare {
            property: property.into(),
            op: CompareOp::Eq,
            value,
        }
    }

    pub fn compare(property: impl Into<String>, op: CompareOp, value: PropertyValue) -> Self {
        Self::Compare {
            property: property.into(),
            op,
            value,
        }
    }
}

/// Predicate against generic column slots, the translated form applied as
/// a relational filter on the wide table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnPredicate {
    All(Vec<ColumnPredicate>),
    Any(Vec<ColumnPredicate>),
    Compare {
        column: ColumnRef,
        op: CompareOp,
        value: PropertyValue,
    },
}

impl ColumnPredicate {
    /// Evaluate against a column bag; used by the in-memory store and as
    /// the reference semantics for the SQL rendering in the Postgres store.
    pub fn matches(&self, columns: &GenericColumns) -> bool {
        match self {
            ColumnPredicate::All(predicates) => {
                predicates.iter().all(|p| p.matches(columns))
            }
            ColumnPredicate::Any(predicates) => {
                predicates.iter().any(|p| p.matches(columns))
            }
            ColumnPredicate::Compare { column, op, value } => match column {
                ColumnRef::Integer(slot) => value
                    .as_integer()
                    .is_some_and(|v| compare_ord(columns.integer(*slot), v, *op)),
                ColumnRef::Float(slot) => value
                    .as_float()
                    .is_some_and(|v| compare_float(columns.float(*slot), v, *op)),
                ColumnRef::Text(slot) => {
                    compare_text(columns.text(*slot), value.as_text(), *op)
                }
            },
        }
    }
}

fn compare_ord(lhs: i64, rhs: i64, op: CompareOp) -> bool {
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Gt => lhs > rhs,
        CompareOp::Ge => lhs >= rhs,
        CompareOp::Lt => lhs < rhs,
        CompareOp::Le => lhs <= rhs,
        CompareOp::Contains => false,
    }
}

fn compare_float(lhs: f64, rhs: f64, op: CompareOp) -> bool {
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Gt => lhs > rhs,
        CompareOp::Ge => lhs >= rhs,
        CompareOp::Lt => lhs < rhs,
        CompareOp::Le => lhs <= rhs,
        CompareOp::Contains => false,
    }
}

fn compare_text(lhs: Option<&str>, rhs: Option<&str>, op: CompareOp) -> bool {
    let Some(rhs) = rhs else {
        return false;
    };
    match op {
        CompareOp::Eq => lhs == Some(rhs),
        CompareOp::Ne => lhs != Some(rhs),
        CompareOp::Contains => lhs.is_some_and(|l| l.contains(rhs)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_comparison() {
        let mut columns = GenericColumns::default();
        columns.set_integer(1, 10);

        let predicate = ColumnPredicate::Compare {
            column: ColumnRef::Integer(1),
            op: CompareOp::Gt,
            value: PropertyValue::Integer(5),
        };
        assert!(predicate.matches(&columns));

        let predicate = ColumnPredicate::Compare {
            column: ColumnRef::Integer(1),
            op: CompareOp::Lt,
            value: PropertyValue::Integer(5),
        };
        assert!(!predicate.matches(&columns));
    }

    #[test]
    fn text_contains() {
        let mut columns = GenericColumns::default();
        columns.set_text(0, Some("aluminium frame".into()));

        let predicate = ColumnPredicate::Compare {
            column: ColumnRef::Text(0),
            op: CompareOp::Contains,
            value: PropertyValue::Text("frame".into()),
        };
        assert!(predicate.matches(&columns));
    }

    #[test]
    fn conjunction_and_disjunction() {
        let mut columns = GenericColumns::default();
        columns.set_integer(0, 1);
        columns.set_integer(1, 2);

        let both = ColumnPredicate::All(vec![
            ColumnPredicate::Compare {
                column: ColumnRef::Integer(0),
                op: CompareOp::Eq,
                value: PropertyValue::Integer(1),
            },
            ColumnPredicate::Compare {
                column: ColumnRef::Integer(1),
                op: CompareOp::Eq,
                value: PropertyValue::Integer(2),
            },
        ]);
        assert!(both.matches(&columns));

        let either = ColumnPredicate::Any(vec![
            ColumnPredicate::Compare {
                column: ColumnRef::Integer(0),
                op: CompareOp::Eq,
                value: PropertyValue::Integer(9),
            },
            ColumnPredicate::Compare {
                column: ColumnRef::Integer(1),
                op: CompareOp::Eq,
                value: PropertyValue::Integer(2),
            },
        ]);
        assert!(either.matches(&columns));
    }
}
