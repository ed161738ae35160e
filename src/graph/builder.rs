//! Graph construction and validation
//!
//! Turns a `WorkloadDescription` into an immutable `Graph`. All validation
//! happens here, before any worker exists: names are resolved to arena
//! indices, weights are checked, operation parameters are checked, and
//! sub-workloads are built (once each) and linked in. The first problem found
//! is returned as a `ConstructionError` naming the node or edge at fault.

use super::{Edge, FailureRoute, Graph, Node, NodeId, NodeKind};
use crate::backend::Command;
use crate::config::workload::FailurePolicy;
use crate::description::{
    BackendDescription, DescriptionSet, NodeDescription, OperationDescription, WorkloadDescription,
    FINISH_NODE,
};
use crate::error::ConstructionError;
use crate::operation::{Assignment, BackendCall, Operation, SubWorkload};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Build a graph that does not call other workloads
pub fn build_graph(
    name: &str,
    description: &WorkloadDescription,
) -> Result<Graph, ConstructionError> {
    GraphBuilder::standalone().build(name, description)
}

/// Builds graphs, resolving `workload` operations against a description set
pub struct GraphBuilder<'a> {
    set: Option<&'a DescriptionSet>,
    /// Sub-workload graphs already built, shared by every caller
    built: HashMap<String, Arc<Graph>>,
    /// Workloads currently being built, for recursion detection
    in_progress: Vec<String>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(set: &'a DescriptionSet) -> Self {
        Self {
            set: Some(set),
            built: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// Builder without a description set; any `workload` operation fails
    pub fn standalone() -> Self {
        Self {
            set: None,
            built: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// Build the top-level graph for `name`
    pub fn build(
        &mut self,
        name: &str,
        description: &WorkloadDescription,
    ) -> Result<Graph, ConstructionError> {
        self.build_scoped(name, description, None)
    }

    fn build_scoped(
        &mut self,
        name: &str,
        description: &WorkloadDescription,
        key_prefix: Option<&str>,
    ) -> Result<Graph, ConstructionError> {
        if self.in_progress.iter().any(|n| n == name) {
            return Err(ConstructionError::RecursiveWorkload(name.to_string()));
        }
        self.in_progress.push(name.to_string());
        let result = self.assemble(name, description, key_prefix);
        self.in_progress.pop();
        result
    }

    fn assemble(
        &mut self,
        name: &str,
        description: &WorkloadDescription,
        key_prefix: Option<&str>,
    ) -> Result<Graph, ConstructionError> {
        if description.nodes.is_empty() {
            return Err(ConstructionError::Empty(name.to_string()));
        }

        let mut index: HashMap<&str, NodeId> = HashMap::with_capacity(description.nodes.len() + 1);
        for (i, node) in description.nodes.iter().enumerate() {
            if index.insert(node.name.as_str(), NodeId(i)).is_some() {
                return Err(ConstructionError::DuplicateNode(node.name.clone()));
            }
        }

        let implicit_finish = !index.contains_key(FINISH_NODE)
            && description
                .nodes
                .iter()
                .any(|n| n.references().contains(&FINISH_NODE));
        if implicit_finish {
            index.insert(FINISH_NODE, NodeId(description.nodes.len()));
        }

        let resolver = Resolver { index: &index };
        let entry_name = description
            .entry
            .as_deref()
            .unwrap_or(description.nodes[0].name.as_str());
        let entry = resolver
            .lookup(entry_name)
            .ok_or_else(|| ConstructionError::MissingEntry(entry_name.to_string()))?;

        let stat_key = |node: &str| -> Arc<str> {
            match key_prefix {
                Some(prefix) => Arc::from(format!("{}/{}", prefix, node)),
                None => Arc::from(node),
            }
        };

        let mut nodes = Vec::with_capacity(index.len());
        for desc in &description.nodes {
            let kind = self.compile_kind(desc, &resolver)?;
            let edges = compile_edges(desc, &kind, &resolver)?;
            let on_failure = match &desc.on_failure {
                None => None,
                Some(FailurePolicy::Action(action)) => Some(FailureRoute::Action(*action)),
                Some(FailurePolicy::Goto { goto }) => {
                    Some(FailureRoute::Goto(resolver.resolve(&desc.name, goto)?))
                }
            };
            nodes.push(Node::new(desc.name.clone(), stat_key(&desc.name), kind, edges, on_failure));
        }
        if implicit_finish {
            nodes.push(Node::new(
                FINISH_NODE.to_string(),
                stat_key(FINISH_NODE),
                NodeKind::Finish,
                Vec::new(),
                None,
            ));
        }

        debug!(workload = name, nodes = nodes.len(), "Built workload graph");
        Ok(Graph::new(name.to_string(), nodes, entry, description.variables.clone()))
    }

    fn compile_kind(
        &mut self,
        desc: &NodeDescription,
        resolver: &Resolver<'_>,
    ) -> Result<NodeKind, ConstructionError> {
        let declared = [
            desc.op.is_some(),
            desc.branch.is_some(),
            desc.repeat.is_some(),
            desc.fork.is_some(),
            desc.finish,
        ];
        if declared.iter().filter(|d| **d).count() != 1 {
            return Err(ConstructionError::AmbiguousNode(desc.name.clone()));
        }

        if let Some(op) = &desc.op {
            return Ok(NodeKind::Operation(self.compile_operation(&desc.name, op)?));
        }
        if let Some(branch) = &desc.branch {
            return Ok(NodeKind::Branch {
                condition: branch.condition.clone(),
                then: resolver.resolve(&desc.name, &branch.then)?,
                otherwise: resolver.resolve(&desc.name, &branch.otherwise)?,
            });
        }
        if let Some(repeat) = &desc.repeat {
            if repeat.counter.as_deref() == Some("") {
                return Err(invalid(&desc.name, "loop counter name must not be empty"));
            }
            return Ok(NodeKind::Loop {
                count: repeat.count,
                body: resolver.resolve(&desc.name, &repeat.body)?,
                counter: repeat.counter.clone(),
            });
        }
        if let Some(fork) = &desc.fork {
            if fork.is_empty() {
                return Err(invalid(&desc.name, "fork needs at least one branch"));
            }
            let branches = fork
                .iter()
                .map(|target| resolver.resolve(&desc.name, target))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(NodeKind::Fork { branches });
        }
        Ok(NodeKind::Finish)
    }

    fn compile_operation(
        &mut self,
        node: &str,
        op: &OperationDescription,
    ) -> Result<Operation, ConstructionError> {
        if let Some((command, params)) = op.as_backend() {
            return compile_backend(node, command, params).map(Operation::Backend);
        }

        match op {
            OperationDescription::Set { variable, value } => {
                if variable.is_empty() {
                    return Err(invalid(node, "set needs a variable name"));
                }
                value.check().map_err(|reason| invalid(node, &reason))?;
                Ok(Operation::Set(Assignment {
                    variable: variable.clone(),
                    value: value.clone(),
                }))
            }
            OperationDescription::Sleep { millis, micros } => Ok(Operation::Sleep(
                Duration::from_millis(*millis) + Duration::from_micros(*micros),
            )),
            OperationDescription::Conditional(condition) => {
                if condition.variable.is_empty() {
                    return Err(invalid(node, "conditional needs a variable name"));
                }
                Ok(Operation::Conditional(condition.clone()))
            }
            OperationDescription::Workload { name, iterations } => {
                if *iterations == 0 {
                    return Err(invalid(node, "workload iterations must be at least 1"));
                }
                let graph = self.sub_graph(node, name)?;
                Ok(Operation::Workload(SubWorkload {
                    name: name.clone(),
                    graph,
                    iterations: *iterations,
                }))
            }
            OperationDescription::Noop => Ok(Operation::Noop),
            _ => Err(invalid(node, "unsupported operation")),
        }
    }

    fn sub_graph(&mut self, node: &str, workload: &str) -> Result<Arc<Graph>, ConstructionError> {
        if self.in_progress.iter().any(|n| n == workload) {
            return Err(ConstructionError::RecursiveWorkload(workload.to_string()));
        }
        if let Some(graph) = self.built.get(workload) {
            return Ok(Arc::clone(graph));
        }

        let description = self
            .set
            .and_then(|set| set.workloads.get(workload))
            .ok_or_else(|| ConstructionError::UnknownWorkload {
                node: node.to_string(),
                workload: workload.to_string(),
            })?;
        let graph = Arc::new(self.build_scoped(workload, description, Some(workload))?);
        self.built.insert(workload.to_string(), Arc::clone(&graph));
        Ok(graph)
    }
}

struct Resolver<'a> {
    index: &'a HashMap<&'a str, NodeId>,
}

impl Resolver<'_> {
    fn lookup(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    fn resolve(&self, from: &str, target: &str) -> Result<NodeId, ConstructionError> {
        self.lookup(target).ok_or_else(|| ConstructionError::DanglingEdge {
            node: from.to_string(),
            target: target.to_string(),
        })
    }
}

fn invalid(node: &str, reason: &str) -> ConstructionError {
    ConstructionError::InvalidOperation {
        node: node.to_string(),
        reason: reason.to_string(),
    }
}

fn compile_edges(
    desc: &NodeDescription,
    kind: &NodeKind,
    resolver: &Resolver<'_>,
) -> Result<Vec<Edge>, ConstructionError> {
    let Some(next) = &desc.next else {
        return Ok(Vec::new());
    };
    if matches!(kind, NodeKind::Branch { .. } | NodeKind::Finish) {
        return Err(invalid(
            &desc.name,
            &format!("{} nodes cannot declare next", kind.label()),
        ));
    }

    let mut total = 0.0_f64;
    next.edges()
        .into_iter()
        .map(|(target, weight)| {
            if weight < 0.0 {
                return Err(ConstructionError::NegativeWeight {
                    node: desc.name.clone(),
                    target: target.to_string(),
                    weight,
                });
            }
            // Weights are sampled over their running sum, which must stay finite too
            total += weight;
            if !weight.is_finite() || !total.is_finite() {
                return Err(ConstructionError::NonFiniteWeight {
                    node: desc.name.clone(),
                    target: target.to_string(),
                });
            }
            Ok(Edge {
                target: resolver.resolve(&desc.name, target)?,
                weight,
            })
        })
        .collect()
}

fn compile_backend(
    node: &str,
    command: Command,
    params: &BackendDescription,
) -> Result<BackendCall, ConstructionError> {
    let object_or_none = |value: &Option<Value>, what: &str| match value {
        None => Ok(()),
        Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(invalid(node, &format!("{} {} must be a mapping", command, what))),
    };
    object_or_none(&params.filter, "filter")?;
    object_or_none(&params.document, "document")?;
    object_or_none(&params.update, "update")?;

    for (field, value) in [("database", &params.database), ("collection", &params.collection)] {
        if value.as_deref() == Some("") {
            return Err(invalid(node, &format!("{} name must not be empty", field)));
        }
    }

    let document = match command {
        Command::Insert => Some(
            params
                .document
                .clone()
                .ok_or_else(|| invalid(node, "insert needs a document"))?,
        ),
        Command::Update => Some(
            params
                .update
                .clone()
                .ok_or_else(|| invalid(node, "update needs an update document"))?,
        ),
        _ => None,
    };

    Ok(BackendCall {
        command,
        database: params.database.clone(),
        collection: params.collection.clone(),
        document,
        filter: params.filter.clone(),
        store: params.store.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::workload::FailureAction;

    fn set(yaml: &str) -> DescriptionSet {
        DescriptionSet::from_yaml(yaml).unwrap()
    }

    fn build(yaml: &str) -> Result<Graph, ConstructionError> {
        let set = set(yaml);
        let description = set.get("main").unwrap();
        GraphBuilder::new(&set).build("main", description)
    }

    #[test]
    fn test_simple_graph() {
        let graph = build(
            r#"
main:
  nodes:
    - { name: a, op: { type: noop }, next: [ { node: b, weight: 2 }, { node: c, weight: 0.5 } ] }
    - { name: b, op: { type: noop }, next: c }
    - { name: c, op: { type: noop } }
"#,
        )
        .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.entry(), NodeId(0));
        let a = graph.node(graph.entry());
        assert_eq!(a.edges().len(), 2);
        assert_eq!(a.total_weight(), 2.5);
        assert_eq!(a.stat_key().as_ref(), "a");
        assert!(graph.node(NodeId(2)).is_terminal());
    }

    #[test]
    fn test_dangling_edge() {
        let err =
            build("main:\n  nodes:\n    - { name: a, op: { type: noop }, next: ghost }\n").unwrap_err();
        assert_eq!(
            err,
            ConstructionError::DanglingEdge {
                node: "a".to_string(),
                target: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_negative_and_non_finite_weights() {
        let err = build(
            "main:\n  nodes:\n    - { name: a, op: { type: noop }, next: [ { node: a, weight: -1 } ] }\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConstructionError::NegativeWeight { weight, .. } if weight == -1.0));

        let err = build(
            "main:\n  nodes:\n    - { name: a, op: { type: noop }, next: [ { node: a, weight: .inf } ] }\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConstructionError::NonFiniteWeight { .. }));
    }

    #[test]
    fn test_weight_sum_overflow() {
        let err = build(
            r#"
main:
  nodes:
    - { name: a, op: { type: noop }, next: [ { node: b, weight: 1.0e308 }, { node: b, weight: 1.0e308 } ] }
    - { name: b, op: { type: noop } }
"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConstructionError::NonFiniteWeight {
                node: "a".to_string(),
                target: "b".to_string(),
            }
        );

        // Large but summable weights are fine
        let graph = build(
            r#"
main:
  nodes:
    - { name: a, op: { type: noop }, next: [ { node: b, weight: 1.0e300 }, { node: b, weight: 1.0e300 } ] }
    - { name: b, op: { type: noop } }
"#,
        )
        .unwrap();
        assert!(graph.node(graph.entry()).total_weight().is_finite());
    }

    #[test]
    fn test_entry_resolution() {
        let err = build("main:\n  entry: zzz\n  nodes:\n    - { name: a, op: { type: noop } }\n")
            .unwrap_err();
        assert_eq!(err, ConstructionError::MissingEntry("zzz".to_string()));

        let graph = build(
            "main:\n  entry: b\n  nodes:\n    - { name: a, op: { type: noop } }\n    - { name: b, op: { type: noop } }\n",
        )
        .unwrap();
        assert_eq!(graph.entry(), NodeId(1));
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(
            build("main:\n  nodes: []\n").unwrap_err(),
            ConstructionError::Empty("main".to_string())
        );
        assert_eq!(
            build("main:\n  nodes:\n    - { name: a, op: { type: noop } }\n    - { name: a, finish: true }\n")
                .unwrap_err(),
            ConstructionError::DuplicateNode("a".to_string())
        );
        assert_eq!(
            build("main:\n  nodes:\n    - { name: a, op: { type: noop }, finish: true }\n").unwrap_err(),
            ConstructionError::AmbiguousNode("a".to_string())
        );
        assert_eq!(
            build("main:\n  nodes:\n    - { name: a }\n").unwrap_err(),
            ConstructionError::AmbiguousNode("a".to_string())
        );
        assert!(matches!(
            build("main:\n  nodes:\n    - { name: a, finish: true, next: a }\n").unwrap_err(),
            ConstructionError::InvalidOperation { .. }
        ));
    }

    #[test]
    fn test_implicit_finish_node() {
        let graph = build(
            "main:\n  nodes:\n    - { name: a, op: { type: noop }, next: [ { node: Finish, weight: 1 } ] }\n",
        )
        .unwrap();
        assert_eq!(graph.len(), 2);
        let finish = graph.find(FINISH_NODE).unwrap();
        assert!(matches!(graph.node(finish).kind(), NodeKind::Finish));
    }

    #[test]
    fn test_failure_routes() {
        let graph = build(
            r#"
main:
  nodes:
    - { name: a, op: { type: noop }, on_failure: { goto: b } }
    - { name: b, op: { type: noop }, on_failure: terminate }
"#,
        )
        .unwrap();
        assert_eq!(graph.node(NodeId(0)).on_failure(), Some(FailureRoute::Goto(NodeId(1))));
        assert_eq!(
            graph.node(NodeId(1)).on_failure(),
            Some(FailureRoute::Action(FailureAction::Terminate))
        );
    }

    #[test]
    fn test_invalid_operation_parameters() {
        let cases = [
            "{ type: insert }",
            "{ type: insert, document: [1, 2] }",
            "{ type: update, filter: { a: 1 } }",
            "{ type: find, filter: 3 }",
            "{ type: find, collection: '' }",
            "{ type: set, variable: '', value: 1 }",
            "{ type: set, variable: x, value: { random_int: { min: 3, max: 1 } } }",
            "{ type: workload, name: main, iterations: 0 }",
        ];
        for op in cases {
            let yaml = format!("main:\n  nodes:\n    - {{ name: a, op: {} }}\n", op);
            let err = build(&yaml).unwrap_err();
            assert!(
                matches!(err, ConstructionError::InvalidOperation { .. }),
                "{} gave {:?}",
                op,
                err
            );
        }
    }

    #[test]
    fn test_sub_workload_linking() {
        let yaml = r#"
main:
  nodes:
    - { name: call, op: { type: workload, name: helper, iterations: 2 }, next: again }
    - { name: again, op: { type: workload, name: helper } }
helper:
  nodes:
    - { name: step, op: { type: noop } }
"#;
        let graph = build(yaml).unwrap();
        let (first, second) = match (graph.node(NodeId(0)).kind(), graph.node(NodeId(1)).kind()) {
            (
                NodeKind::Operation(Operation::Workload(a)),
                NodeKind::Operation(Operation::Workload(b)),
            ) => (a, b),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(first.iterations, 2);
        assert!(Arc::ptr_eq(&first.graph, &second.graph));
        assert_eq!(first.graph.node(NodeId(0)).stat_key().as_ref(), "helper/step");
    }

    #[test]
    fn test_recursive_and_unknown_workloads() {
        let recursive = r#"
main:
  nodes:
    - { name: a, op: { type: workload, name: other } }
other:
  nodes:
    - { name: b, op: { type: workload, name: main } }
"#;
        assert_eq!(
            build(recursive).unwrap_err(),
            ConstructionError::RecursiveWorkload("main".to_string())
        );

        let unknown = "main:\n  nodes:\n    - { name: a, op: { type: workload, name: nope } }\n";
        assert_eq!(
            build(unknown).unwrap_err(),
            ConstructionError::UnknownWorkload {
                node: "a".to_string(),
                workload: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_standalone_builder_rejects_sub_workloads() {
        let set = set("main:\n  nodes:\n    - { name: a, op: { type: workload, name: main } }\n");
        let err = build_graph("main", set.get("main").unwrap()).unwrap_err();
        assert!(matches!(err, ConstructionError::RecursiveWorkload(_)));
    }
}
