//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and `WorkflowDefinition`, validates structural
//! constraints (name format, unique step names, bindings that only look
//! backwards), and discovers workflow files on disk.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use waypoint_types::workflow::WorkflowDefinition;

use super::binding::{self, Root};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading workflow definitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A step binds to a step that is not declared before it.
    #[error("step '{step}' binds to '{target}', which is not an earlier step")]
    ForwardReference { step: String, target: String },

    /// Two definition files declare the same workflow name.
    #[error("workflow '{name}' is defined in both {} and {}", first.display(), second.display())]
    DuplicateWorkflow {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// No definition with this name was found.
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
///
/// Runs `validate_definition` after deserialization, so the returned value
/// is guaranteed to be structurally valid.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Workflow and step names are non-empty `[A-Za-z0-9_-]`
/// - At least one step exists and step names are unique
/// - A fallback differs from its step's primary tool
/// - Timeout > 0 if set
/// - Every binding expression parses, and step references point strictly
///   backwards
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if !valid_name(&def.name) {
        return Err(WorkflowError::ValidationError(format!(
            "workflow name '{}' must be non-empty and contain only alphanumerics, '-' or '_'",
            def.name
        )));
    }

    if def.steps.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut earlier: HashSet<&str> = HashSet::new();
    for step in &def.steps {
        if !valid_name(&step.name) {
            return Err(WorkflowError::ValidationError(format!(
                "step name '{}' must be non-empty and contain only alphanumerics, '-' or '_'",
                step.name
            )));
        }
        if earlier.contains(step.name.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step name: '{}'",
                step.name
            )));
        }
        if step.tool.is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' has no tool",
                step.name
            )));
        }
        if step.fallback.as_deref() == Some(step.tool.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' names its primary tool as fallback",
                step.name
            )));
        }
        if step.timeout_secs == Some(0) {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' timeout must be > 0",
                step.name
            )));
        }

        let references = binding::references(&step.input).map_err(|e| {
            WorkflowError::ValidationError(format!("step '{}': {e}", step.name))
        })?;
        for reference in references {
            if let Root::Step(target) = &reference.root {
                if !earlier.contains(target.as_str()) {
                    return Err(WorkflowError::ForwardReference {
                        step: step.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        earlier.insert(step.name.as_str());
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Discover all workflow YAML files under `base_dir`.
///
/// Scans for `.yaml` and `.yml` files recursively. Files that fail to parse
/// are skipped with a warning.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            match load_workflow_file(&path) {
                Ok(def) => results.push((path, def)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping invalid workflow file");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// WorkflowCatalog
// ---------------------------------------------------------------------------

/// Name-keyed set of loaded definitions.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    entries: BTreeMap<String, (PathBuf, WorkflowDefinition)>,
}

impl WorkflowCatalog {
    /// Load every definition under `dir`. Duplicate names are an error.
    pub fn load_dir(dir: &Path) -> Result<Self, WorkflowError> {
        let mut catalog = Self::default();
        for (path, def) in discover_workflows(dir)? {
            catalog.insert(path, def)?;
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, path: PathBuf, def: WorkflowDefinition) -> Result<(), WorkflowError> {
        if let Some((first, _)) = self.entries.get(&def.name) {
            return Err(WorkflowError::DuplicateWorkflow {
                name: def.name.clone(),
                first: first.clone(),
                second: path,
            });
        }
        self.entries.insert(def.name.clone(), (path, def));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&WorkflowDefinition, WorkflowError> {
        self.entries
            .get(name)
            .map(|(_, def)| def)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(name.to_string()))
    }

    /// Resolve either a catalog name or a path to a YAML file.
    pub fn find(&self, name_or_path: &str) -> Result<WorkflowDefinition, WorkflowError> {
        if let Ok(def) = self.get(name_or_path) {
            return Ok(def.clone());
        }
        let path = Path::new(name_or_path);
        if path.is_file() {
            return load_workflow_file(path);
        }
        Err(WorkflowError::UnknownWorkflow(name_or_path.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &WorkflowDefinition)> {
        self.entries.values().map(|(p, d)| (p.as_path(), d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
