//! Per-worker variable store
//!
//! The only state operations share. Each worker (and each forked branch) owns
//! its own store; nothing here is synchronised.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Prefix marking a string document value as a variable reference
pub const VARIABLE_PREFIX: char = '$';

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    values: HashMap<String, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from a description's initial variables
    pub fn from_initial(initial: &BTreeMap<String, Value>) -> Self {
        Self {
            values: initial.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        match self.values.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.values.insert(name.to_string(), value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace every `"$name"` string inside `template` with the value of `name`
    ///
    /// Only values are substituted, never object keys, so operator keys such as
    /// `$set` pass through untouched.
    pub fn substitute(&self, template: &Value) -> Result<Value, String> {
        match template {
            Value::String(s) => match s.strip_prefix(VARIABLE_PREFIX) {
                Some(name) if !name.is_empty() => self
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("unknown variable `{}`", name)),
                _ => Ok(template.clone()),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.substitute(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(fields) => {
                let mut out = Map::with_capacity(fields.len());
                for (key, value) in fields {
                    out.insert(key.clone(), self.substitute(value)?);
                }
                Ok(Value::Object(out))
            }
            _ => Ok(template.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get() {
        let mut vars = Variables::new();
        assert!(vars.is_empty());
        vars.set("a", json!(1));
        vars.set("a", json!(2));
        assert_eq!(vars.get("a"), Some(&json!(2)));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn test_substitute_nested() {
        let mut vars = Variables::new();
        vars.set("id", json!(42));
        vars.set("tag", json!("hot"));

        let doc = json!({
            "_id": "$id",
            "tags": ["$tag", "plain"],
            "$set": { "n": "$id" },
            "k": 3
        });
        let out = vars.substitute(&doc).unwrap();
        assert_eq!(
            out,
            json!({ "_id": 42, "tags": ["hot", "plain"], "$set": { "n": 42 }, "k": 3 })
        );
    }

    #[test]
    fn test_substitute_unknown_variable() {
        let vars = Variables::new();
        let err = vars.substitute(&json!({ "a": "$missing" })).unwrap_err();
        assert!(err.contains("missing"));
    }

    #[test]
    fn test_lone_dollar_is_literal() {
        let vars = Variables::new();
        assert_eq!(vars.substitute(&json!("$")).unwrap(), json!("$"));
    }

    #[test]
    fn test_from_initial() {
        let mut initial = BTreeMap::new();
        initial.insert("counter".to_string(), json!(0));
        let vars = Variables::from_initial(&initial);
        assert_eq!(vars.get("counter"), Some(&json!(0)));
    }
}
