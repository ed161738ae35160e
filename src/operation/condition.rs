//! Comparisons over thread variables
//!
//! Used by `branch` nodes to pick a route and by `conditional` operations to
//! turn a comparison into a success or failure sample.

use super::variables::Variables;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Eq => "eq",
            Comparison::Ne => "ne",
            Comparison::Lt => "lt",
            Comparison::Le => "le",
            Comparison::Gt => "gt",
            Comparison::Ge => "ge",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
        }
    }
}

/// `<variable> <compare> <value>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub variable: String,
    pub compare: Comparison,
    pub value: Value,
}

impl Condition {
    /// Evaluate against the worker's variables
    ///
    /// Numbers compare numerically regardless of integer/float representation,
    /// strings lexically. Any other pairing only supports `eq`/`ne`. A missing
    /// variable is an error, not a false result.
    pub fn evaluate(&self, variables: &Variables) -> Result<bool, String> {
        let current = variables
            .get(&self.variable)
            .ok_or_else(|| format!("unknown variable `{}`", self.variable))?;

        match order(current, &self.value) {
            Some(ordering) => Ok(self.compare.accepts(ordering)),
            None => match self.compare {
                Comparison::Eq => Ok(current == &self.value),
                Comparison::Ne => Ok(current != &self.value),
                _ => Err(format!(
                    "cannot order {} against {} for `{}`",
                    current, self.value, self
                )),
            },
        }
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.variable, self.compare.as_str(), self.value)
    }
}
