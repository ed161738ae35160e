//! Graphviz (DOT) export
//!
//! Renders one statement per line:
//!
//! ```text
//! digraph "main" {
//!   "insert_one" [label="insert_one\n(insert)", entry="true", shape=doublecircle];
//!   "bump" [label="bump\n(set)"];
//!   "insert_one" -> "bump" [label="3"];
//!   "check" -> "insert_one" [label="then", style=dashed];
//! }
//! ```
//!
//! Weighted edges carry their exact weight as the label. Structural edges
//! (branch targets, loop bodies, fork branches, failure gotos) are dashed and
//! labelled with their role. Identifiers are always quoted; `"` and `\` are
//! escaped, and names with control characters are rejected because no
//! escaping keeps them intact through DOT tooling.
//!
//! `parse_graph_description` reads this dialect back into a `GraphOutline`.

use super::{FailureRoute, Graph, NodeKind};
use crate::error::ExportError;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Escape a name for use inside a quoted DOT identifier
pub fn escape_name(name: &str) -> Result<String, ExportError> {
    if name.chars().any(char::is_control) {
        return Err(ExportError::UnsafeName(name.to_string()));
    }
    let mut out = String::with_capacity(name.len() + 2);
    for c in name.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    Ok(out)
}

fn format_weight(weight: f64) -> String {
    format!("{}", weight)
}

/// Render `graph` as DOT text
pub fn generate_graph_description(graph: &Graph) -> Result<String, ExportError> {
    let mut out = String::new();
    let names = graph
        .nodes()
        .iter()
        .map(|n| escape_name(n.name()))
        .collect::<Result<Vec<_>, _>>()?;

    // Writing to a String cannot fail
    let _ = writeln!(out, "digraph \"{}\" {{", escape_name(graph.name())?);

    for (id, node) in graph.iter() {
        let name = &names[id.index()];
        let _ = write!(out, "  \"{}\" [label=\"{}\\n({})\"", name, name, node.kind().label());
        if id == graph.entry() {
            let _ = write!(out, ", entry=\"true\", shape=doublecircle");
        } else if matches!(node.kind(), NodeKind::Finish) {
            let _ = write!(out, ", shape=doubleoctagon");
        }
        let _ = writeln!(out, "];");
    }

    for (id, node) in graph.iter() {
        let from = &names[id.index()];
        for edge in node.edges() {
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [label=\"{}\"];",
                from,
                names[edge.target.index()],
                format_weight(edge.weight)
            );
        }

        let mut structural = |to: usize, role: &str| {
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [label=\"{}\", style=dashed];",
                from, names[to], role
            );
        };
        match node.kind() {
            NodeKind::Branch { then, otherwise, .. } => {
                structural(then.index(), "then");
                structural(otherwise.index(), "else");
            }
            NodeKind::Loop { body, .. } => structural(body.index(), "body"),
            NodeKind::Fork { branches } => {
                for branch in branches {
                    structural(branch.index(), "fork");
                }
            }
            NodeKind::Operation(_) | NodeKind::Finish => {}
        }
        if let Some(FailureRoute::Goto(target)) = node.on_failure() {
            structural(target.index(), "on_failure");
        }
    }

    out.push_str("}\n");
    Ok(out)
}

/// Render `graph` and write it to `path`
pub fn write_graph_description(graph: &Graph, path: &Path) -> Result<(), ExportError> {
    let text = generate_graph_description(graph)?;
    fs::write(path, text).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Structure recovered from a DOT description
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphOutline {
    pub name: String,
    pub entry: Option<String>,
    pub nodes: BTreeSet<String>,
    /// Weighted edges in file order
    pub edges: Vec<(String, String, f64)>,
    /// Dashed edges: `(from, to, role)`
    pub structural: Vec<(String, String, String)>,
}

impl GraphOutline {
    /// Outline of an in-memory graph, for comparison with a parsed one
    pub fn from_graph(graph: &Graph) -> Self {
        let name_of = |id: super::NodeId| graph.node(id).name().to_string();
        let mut outline = GraphOutline {
            name: graph.name().to_string(),
            entry: Some(name_of(graph.entry())),
            ..Default::default()
        };
        for (_, node) in graph.iter() {
            outline.nodes.insert(node.name().to_string());
            for edge in node.edges() {
                outline
                    .edges
                    .push((node.name().to_string(), name_of(edge.target), edge.weight));
            }
        }
        outline
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Quoted(String),
    Bare(String),
    Arrow,
    Open(char),
    Close(char),
    Equals,
    Comma,
    Semi,
}

fn tokenize(line: &str, line_no: usize) -> Result<Vec<Token>, ExportError> {
    let err = |message: &str| ExportError::Parse {
        line: line_no,
        message: message.to_string(),
    };
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '"' => {
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => {
                                // `\n` and friends are layout escapes, not part of the text
                                if escaped != '"' && escaped != '\\' {
                                    value.push('\\');
                                }
                                value.push(escaped);
                            }
                            None => return Err(err("dangling escape")),
                        },
                        Some('"') => break,
                        Some(other) => value.push(other),
                        None => return Err(err("unterminated string")),
                    }
                }
                tokens.push(Token::Quoted(value));
            }
            '-' if chars.peek() == Some(&'>') => {
                chars.next();
                tokens.push(Token::Arrow);
            }
            '{' | '[' => tokens.push(Token::Open(c)),
            '}' | ']' => tokens.push(Token::Close(c)),
            '=' => tokens.push(Token::Equals),
            ',' => tokens.push(Token::Comma),
            ';' => tokens.push(Token::Semi),
            c if c.is_alphanumeric() || matches!(c, '_' | '.' | '-') => {
                let mut value = c.to_string();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || matches!(next, '_' | '.' | '-') {
                        value.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Bare(value));
            }
            other => return Err(err(&format!("unexpected character {:?}", other))),
        }
    }
    Ok(tokens)
}

fn parse_attributes(tokens: &[Token], line: usize) -> Result<Vec<(String, String)>, ExportError> {
    let err = |message: &str| ExportError::Parse {
        line,
        message: message.to_string(),
    };
    let mut attrs = Vec::new();
    let inner = match tokens {
        [] | [Token::Semi] => return Ok(attrs),
        [Token::Open('['), rest @ ..] => rest,
        _ => return Err(err("expected attribute list")),
    };

    let mut rest = inner;
    loop {
        match rest {
            [Token::Close(']'), tail @ ..] if tail.is_empty() || tail == [Token::Semi] => {
                return Ok(attrs)
            }
            [key, Token::Equals, value, tail @ ..] => {
                let text = |t: &Token| match t {
                    Token::Quoted(s) | Token::Bare(s) => Some(s.clone()),
                    _ => None,
                };
                match (text(key), text(value)) {
                    (Some(k), Some(v)) => attrs.push((k, v)),
                    _ => return Err(err("malformed attribute")),
                }
                rest = match tail {
                    [Token::Comma, more @ ..] => more,
                    more => more,
                };
            }
            _ => return Err(err("malformed attribute list")),
        }
    }
}

fn attribute<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Parse text produced by `generate_graph_description`
pub fn parse_graph_description(text: &str) -> Result<GraphOutline, ExportError> {
    let mut outline = GraphOutline::default();
    let mut opened = false;
    let mut closed = false;

    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let err = |message: &str| ExportError::Parse {
            line,
            message: message.to_string(),
        };
        let tokens = tokenize(raw, line)?;
        if tokens.is_empty() {
            continue;
        }
        if closed {
            return Err(err("content after closing brace"));
        }

        match tokens.as_slice() {
            [Token::Bare(kw), Token::Quoted(name), Token::Open('{')]
                if kw == "digraph" && !opened =>
            {
                outline.name = name.clone();
                opened = true;
            }
            _ if !opened => return Err(err("expected `digraph \"name\" {`")),
            [Token::Close('}')] => closed = true,
            [Token::Quoted(from), Token::Arrow, Token::Quoted(to), rest @ ..] => {
                let attrs = parse_attributes(rest, line)?;
                let label = attribute(&attrs, "label").ok_or_else(|| err("edge without label"))?;
                if attribute(&attrs, "style") == Some("dashed") {
                    outline
                        .structural
                        .push((from.clone(), to.clone(), label.to_string()));
                } else {
                    let weight: f64 = label
                        .parse()
                        .map_err(|_| err(&format!("edge weight {:?} is not a number", label)))?;
                    outline.edges.push((from.clone(), to.clone(), weight));
                }
            }
            [Token::Quoted(name), rest @ ..] => {
                let attrs = parse_attributes(rest, line)?;
                if attribute(&attrs, "entry") == Some("true") {
                    if outline.entry.is_some() {
                        return Err(err("more than one entry node"));
                    }
                    outline.entry = Some(name.clone());
                }
                outline.nodes.insert(name.clone());
            }
            _ => return Err(err("unrecognised statement")),
        }
    }

    if !closed {
        return Err(ExportError::Parse {
            line: text.lines().count(),
            message: "missing closing brace".to_string(),
        });
    }
    Ok(outline)
}
