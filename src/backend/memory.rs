//! In-process document store
//!
//! A deliberately small document database: collections are vectors of JSON
//! objects behind one mutex. Filters match on top-level field equality and
//! updates understand `$set`, `$inc` and whole-document replacement. That is
//! enough for a workload to produce realistic read/write mixes without an
//! external server.

use super::{Backend, BackendError, Command, Namespace, Reply, Request};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

type Document = Map<String, Value>;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: Mutex<HashMap<Namespace, Vec<Document>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently stored in `namespace`
    pub fn document_count(&self, namespace: &Namespace) -> usize {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .map_or(0, Vec::len)
    }
}

fn as_object<'a>(
    value: Option<&'a Value>,
    what: &str,
) -> Result<Option<&'a Document>, BackendError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(BackendError::InvalidDocument(format!(
            "{} must be an object, got {}",
            what, other
        ))),
    }
}

fn matches(document: &Document, filter: Option<&Document>) -> bool {
    filter.map_or(true, |filter| {
        filter.iter().all(|(key, expected)| document.get(key) == Some(expected))
    })
}

fn apply_update(document: &mut Document, update: &Document) -> Result<(), BackendError> {
    let has_operators = update.keys().any(|k| k.starts_with('$'));
    if !has_operators {
        let id = document.get("_id").cloned();
        *document = update.clone();
        if let Some(id) = id {
            document.insert("_id".to_string(), id);
        }
        return Ok(());
    }

    for (operator, fields) in update {
        let fields = fields.as_object().ok_or_else(|| {
            BackendError::InvalidDocument(format!("{} expects an object", operator))
        })?;
        match operator.as_str() {
            "$set" => {
                for (key, value) in fields {
                    document.insert(key.clone(), value.clone());
                }
            }
            "$inc" => {
                for (key, by) in fields {
                    let by = by.as_i64().ok_or_else(|| {
                        BackendError::InvalidDocument(format!(
                            "$inc amount for `{}` must be an integer",
                            key
                        ))
                    })?;
                    let current = match document.get(key) {
                        None => 0,
                        Some(v) => v.as_i64().ok_or_else(|| {
                            BackendError::Rejected(format!(
                                "cannot $inc non-integer field `{}`",
                                key
                            ))
                        })?,
                    };
                    document.insert(key.clone(), Value::from(current.wrapping_add(by)));
                }
            }
            other => {
                return Err(BackendError::InvalidDocument(format!(
                    "unsupported update operator {}",
                    other
                )))
            }
        }
    }
    Ok(())
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn execute(&self, request: &Request) -> Result<Reply, BackendError> {
        let filter = as_object(request.filter.as_ref(), "filter")?;
        let mut collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);

        let affected = match request.command {
            Command::Insert => {
                let document =
                    as_object(request.document.as_ref(), "document")?.ok_or_else(|| {
                        BackendError::InvalidDocument("insert needs a document".to_string())
                    })?;
                collections
                    .entry(request.namespace.clone())
                    .or_default()
                    .push(document.clone());
                1
            }
            Command::Find | Command::Count => collections
                .get(&request.namespace)
                .map_or(0, |docs| docs.iter().filter(|d| matches(d, filter)).count() as u64),
            Command::Update => {
                let update = as_object(request.document.as_ref(), "update")?.ok_or_else(|| {
                    BackendError::InvalidDocument("update needs an update document".to_string())
                })?;
                let mut modified = 0;
                if let Some(docs) = collections.get_mut(&request.namespace) {
                    for doc in docs.iter_mut().filter(|d| matches(d, filter)) {
                        apply_update(doc, update)?;
                        modified += 1;
                    }
                }
                modified
            }
            Command::Remove => match collections.get_mut(&request.namespace) {
                Some(docs) => {
                    let before = docs.len();
                    docs.retain(|d| !matches(d, filter));
                    (before - docs.len()) as u64
                }
                None => 0,
            },
            Command::Drop => collections
                .remove(&request.namespace)
                .map_or(0, |docs| docs.len() as u64),
        };

        Ok(Reply { affected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns() -> Namespace {
        Namespace::new("test", "items")
    }

    fn run(
        backend: &MemoryBackend,
        command: Command,
        document: Option<Value>,
        filter: Option<Value>,
    ) -> Result<u64, BackendError> {
        backend
            .execute(&Request {
                command,
                namespace: ns(),
                document,
                filter,
            })
            .map(|r| r.affected)
    }

    #[test]
    fn test_insert_find_count() {
        let backend = MemoryBackend::new();
        run(&backend, Command::Insert, Some(json!({ "k": 1, "v": "a" })), None).unwrap();
        run(&backend, Command::Insert, Some(json!({ "k": 2, "v": "a" })), None).unwrap();

        assert_eq!(run(&backend, Command::Find, None, Some(json!({ "k": 1 }))).unwrap(), 1);
        assert_eq!(run(&backend, Command::Count, None, Some(json!({ "v": "a" }))).unwrap(), 2);
        assert_eq!(run(&backend, Command::Count, None, None).unwrap(), 2);
        assert_eq!(backend.document_count(&ns()), 2);
    }

    #[test]
    fn test_insert_rejects_non_object() {
        let backend = MemoryBackend::new();
        let err = run(&backend, Command::Insert, Some(json!([1, 2])), None).unwrap_err();
        assert!(matches!(err, BackendError::InvalidDocument(_)));
        assert!(run(&backend, Command::Insert, None, None).is_err());
    }

    #[test]
    fn test_update_operators() {
        let backend = MemoryBackend::new();
        run(&backend, Command::Insert, Some(json!({ "_id": 1, "n": 1 })), None).unwrap();

        let modified = run(
            &backend,
            Command::Update,
            Some(json!({ "$inc": { "n": 2 }, "$set": { "tag": "x" } })),
            Some(json!({ "_id": 1 })),
        )
        .unwrap();
        assert_eq!(modified, 1);
        let filter = json!({ "n": 3, "tag": "x" });
        assert_eq!(run(&backend, Command::Find, None, Some(filter)).unwrap(), 1);

        let update = json!({ "fresh": true });
        run(&backend, Command::Update, Some(update), Some(json!({ "_id": 1 }))).unwrap();
        let filter = json!({ "_id": 1, "fresh": true });
        assert_eq!(run(&backend, Command::Find, None, Some(filter)).unwrap(), 1);
        assert_eq!(run(&backend, Command::Find, None, Some(json!({ "n": 3 }))).unwrap(), 0);

        let unsupported = json!({ "$push": { "a": 1 } });
        assert!(run(&backend, Command::Update, Some(unsupported), None).is_err());
    }

    #[test]
    fn test_remove_and_drop() {
        let backend = MemoryBackend::new();
        for i in 0..5 {
            let document = json!({ "i": i, "even": i % 2 == 0 });
            run(&backend, Command::Insert, Some(document), None).unwrap();
        }
        assert_eq!(run(&backend, Command::Remove, None, Some(json!({ "even": true }))).unwrap(), 3);
        assert_eq!(run(&backend, Command::Drop, None, None).unwrap(), 2);
        assert_eq!(backend.document_count(&ns()), 0);
        assert_eq!(run(&backend, Command::Remove, None, None).unwrap(), 0);
    }

    #[test]
    fn test_filter_must_be_object() {
        let backend = MemoryBackend::new();
        assert!(run(&backend, Command::Find, None, Some(json!("x"))).is_err());
    }
}
