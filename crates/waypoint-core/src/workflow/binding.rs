//! Input binding: resolve `{{ ... }}` expressions in a step's input template.
//!
//! Supported expressions:
//! - `{{ params.<path> }}` -- a parameter supplied at start
//! - `{{ steps.<name>.output }}` / `{{ steps.<name>.output.<path> }}` -- the
//!   persisted output of an earlier step
//!
//! Path segments are object keys, or array indices when the value at that
//! point is an array. A string that consists of exactly one expression is
//! replaced by the referenced value with its JSON type preserved; expressions
//! embedded in longer strings are interpolated as text. Unlike plain template
//! rendering, an unresolvable reference is an error, never left as-is.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("malformed expression: {0}")]
    Syntax(String),

    #[error("unknown reference root in '{0}' (expected 'params' or 'steps')")]
    UnknownRoot(String),

    #[error("step '{0}' has no recorded output")]
    MissingStep(String),

    #[error("'{0}' does not resolve to a value")]
    MissingPath(String),
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// What an expression points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    Params,
    Step(String),
}

/// A parsed `{{ ... }}` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub root: Root,
    pub path: Vec<String>,
    /// Original expression text, trimmed.
    pub text: String,
}

impl Reference {
    fn parse(expr: &str) -> Result<Self, BindingError> {
        let text = expr.trim().to_string();
        if text.is_empty() {
            return Err(BindingError::Syntax("empty expression".to_string()));
        }
        let mut parts = text.split('.');
        let root = match parts.next() {
            Some("params") => Root::Params,
            Some("steps") => {
                let name = parts
                    .next()
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| BindingError::Syntax(text.clone()))?;
                if parts.next() != Some("output") {
                    return Err(BindingError::Syntax(format!(
                        "{text} (step references must go through '.output')"
                    )));
                }
                Root::Step(name.to_string())
            }
            _ => return Err(BindingError::UnknownRoot(text)),
        };
        let path: Vec<String> = parts.map(str::to_string).collect();
        if path.iter().any(|p| p.is_empty()) {
            return Err(BindingError::Syntax(text));
        }
        Ok(Self { root, path, text })
    }

    pub fn step_name(&self) -> Option<&str> {
        match &self.root {
            Root::Step(name) => Some(name),
            Root::Params => None,
        }
    }
}

enum Piece<'a> {
    Literal(&'a str),
    Expr(Reference),
}

fn split_template(s: &str) -> Result<Vec<Piece<'_>>, BindingError> {
    let mut pieces = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        if start > 0 {
            pieces.push(Piece::Literal(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| BindingError::Syntax(format!("unclosed '{{{{' in \"{s}\"")))?;
        pieces.push(Piece::Expr(Reference::parse(&after[..end])?));
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest));
    }
    Ok(pieces)
}

/// Every expression in a template, in document order.
pub fn references(template: &Value) -> Result<Vec<Reference>, BindingError> {
    let mut out = Vec::new();
    collect_references(template, &mut out)?;
    Ok(out)
}

fn collect_references(value: &Value, out: &mut Vec<Reference>) -> Result<(), BindingError> {
    match value {
        Value::String(s) => {
            for piece in split_template(s)? {
                if let Piece::Expr(r) = piece {
                    out.push(r);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_references(item, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Names of the steps whose outputs a template reads.
pub fn referenced_steps(template: &Value) -> Result<BTreeSet<String>, BindingError> {
    Ok(references(template)?
        .into_iter()
        .filter_map(|r| match r.root {
            Root::Step(name) => Some(name),
            Root::Params => None,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// BindingContext
// ---------------------------------------------------------------------------

/// Values visible to a step's input template.
#[derive(Debug, Clone, Default)]
pub struct BindingContext {
    params: Value,
    steps: HashMap<String, Value>,
}

impl BindingContext {
    pub fn new(params: Value) -> Self {
        Self {
            params,
            steps: HashMap::new(),
        }
    }

    pub fn insert_step_output(&mut self, step: &str, output: Value) {
        self.steps.insert(step.to_string(), output);
    }

    fn resolve(&self, reference: &Reference) -> Result<&Value, BindingError> {
        let mut current = match &reference.root {
            Root::Params => &self.params,
            Root::Step(name) => self
                .steps
                .get(name)
                .ok_or_else(|| BindingError::MissingStep(name.clone()))?,
        };
        for segment in &reference.path {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            current = next.ok_or_else(|| BindingError::MissingPath(reference.text.clone()))?;
        }
        Ok(current)
    }
}

/// Produce the concrete input for a step from its template.
pub fn bind_inputs(template: &Value, ctx: &BindingContext) -> Result<Value, BindingError> {
    match template {
        Value::String(s) => bind_string(s, ctx),
        Value::Array(items) => items
            .iter()
            .map(|item| bind_inputs(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut bound = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                bound.insert(key.clone(), bind_inputs(item, ctx)?);
            }
            Ok(Value::Object(bound))
        }
        other => Ok(other.clone()),
    }
}

fn bind_string(s: &str, ctx: &BindingContext) -> Result<Value, BindingError> {
    let mut pieces = split_template(s)?;
    if let [Piece::Expr(reference)] = pieces.as_slice() {
        return ctx.resolve(reference).cloned();
    }
    if !pieces.iter().any(|p| matches!(p, Piece::Expr(_))) {
        return Ok(Value::String(s.to_string()));
    }

    let mut out = String::with_capacity(s.len());
    for piece in pieces.drain(..) {
        match piece {
            Piece::Literal(text) => out.push_str(text),
            Piece::Expr(reference) => out.push_str(&value_to_string(ctx.resolve(&reference)?)),
        }
    }
    Ok(Value::String(out))
}

/// Convert a JSON value to text for interpolation.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
