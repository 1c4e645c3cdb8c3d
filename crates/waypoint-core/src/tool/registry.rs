//! Tool registry: the table of declared external operations.
//!
//! The registry is loaded once at startup (from `tools.toml` or built in code)
//! and is read-only afterwards, so it can be shared behind an `Arc` without
//! locking.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use waypoint_types::tool::{RegistrySource, ToolDescriptor};
use waypoint_types::workflow::WorkflowDefinition;

use super::schema;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while building or querying the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("step '{step}' references unknown tool '{tool}'")]
    UnknownStepTool { step: String, tool: String },

    #[error("tool '{tool}' requires environment variables: {}", missing.join(", "))]
    MissingEnv { tool: String, missing: Vec<String> },

    #[error("tool '{tool}' has an invalid {which} schema: {message}")]
    InvalidSchema {
        tool: String,
        which: &'static str,
        message: String,
    },

    #[error("failed to parse registry: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// ToolRegistry
// ---------------------------------------------------------------------------

/// Name-keyed table of [`ToolDescriptor`]s.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `tools.toml` document. Table names become descriptor names.
    pub fn from_toml_str(src: &str) -> Result<Self, RegistryError> {
        let source: RegistrySource =
            toml::from_str(src).map_err(|e| RegistryError::Parse(e.to_string()))?;

        let mut registry = Self::new();
        for (name, mut descriptor) in source.tools {
            descriptor.name = name;
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Load a registry file. A missing file yields an empty registry.
    pub fn load_file(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no tool registry file, starting empty");
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let registry = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), tools = registry.len(), "loaded tool registry");
        Ok(registry)
    }

    /// Add a descriptor. Names are unique and schemas must compile.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }
        for (which, schema) in [
            ("input", descriptor.input_schema.as_ref()),
            ("output", descriptor.output_schema.as_ref()),
        ] {
            if let Some(schema) = schema {
                schema::check_schema(schema).map_err(|message| RegistryError::InvalidSchema {
                    tool: descriptor.name.clone(),
                    which,
                    message,
                })?;
            }
        }
        self.tools.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor, RegistryError> {
        self.tools
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// Check that every `required_env` variable is set in the process
    /// environment.
    pub fn validate_environment(&self, descriptor: &ToolDescriptor) -> Result<(), RegistryError> {
        self.validate_environment_with(descriptor, &|key| std::env::var(key).ok())
    }

    /// Same as [`validate_environment`](Self::validate_environment) against an
    /// arbitrary lookup. Empty values count as missing.
    pub fn validate_environment_with(
        &self,
        descriptor: &ToolDescriptor,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), RegistryError> {
        let missing = missing_env(descriptor, lookup);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::MissingEnv {
                tool: descriptor.name.clone(),
                missing,
            })
        }
    }

    /// Verify that every step's tool (and fallback tool) is registered.
    pub fn ensure_workflow(&self, def: &WorkflowDefinition) -> Result<(), RegistryError> {
        for step in &def.steps {
            for tool in std::iter::once(&step.tool).chain(step.fallback.iter()) {
                if !self.tools.contains_key(tool) {
                    return Err(RegistryError::UnknownStepTool {
                        step: step.name.clone(),
                        tool: tool.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Names of required environment variables that are unset or empty.
pub(crate) fn missing_env(
    descriptor: &ToolDescriptor,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Vec<String> {
    descriptor
        .required_env
        .iter()
        .filter(|key| lookup(key).is_none_or(|v| v.is_empty()))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
