//! Tool descriptor types.
//!
//! A tool is a declared external operation: a subprocess script, an HTTP
//! endpoint, or an in-process implementation supplied by the embedder. The
//! registry source (`tools.toml`) maps tool names to [`ToolDescriptor`]s.

use std::collections::{BTreeMap, HashMap};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Cost class
// ---------------------------------------------------------------------------

/// Whether invoking a tool spends money.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    #[default]
    Free,
    Paid,
}

impl std::fmt::Display for CostClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CostClass::Free => write!(f, "free"),
            CostClass::Paid => write!(f, "paid"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool Descriptor
// ---------------------------------------------------------------------------

/// A registry entry describing one external operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolDescriptor {
    /// Registry key. Filled from the TOML table name when loading a registry.
    #[serde(default)]
    pub name: String,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema the bound input must satisfy (absent = anything).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    /// JSON Schema a successful output must satisfy (absent = anything).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Environment variables that must be set before invocation.
    #[serde(default)]
    pub required_env: Vec<String>,
    /// Cost class.
    #[serde(default)]
    pub cost_class: CostClass,
    /// Safe to invoke more than once with the same input.
    #[serde(default)]
    pub idempotent: bool,
    /// How to invoke the tool. Absent when the implementation is supplied
    /// in-process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke: Option<InvokeSpec>,
}

impl ToolDescriptor {
    /// Create a minimal descriptor: free, non-idempotent, no schemas.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
            output_schema: None,
            required_env: Vec::new(),
            cost_class: CostClass::Free,
            idempotent: false,
            invoke: None,
        }
    }

    pub fn with_cost_class(mut self, cost_class: CostClass) -> Self {
        self.cost_class = cost_class;
        self
    }

    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn with_required_env(mut self, vars: &[&str]) -> Self {
        self.required_env = vars.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_invoke(mut self, invoke: InvokeSpec) -> Self {
        self.invoke = Some(invoke);
        self
    }
}

/// Transport used to reach a tool.
///
/// Internally tagged by `type`:
/// ```toml
/// [tools.search.invoke]
/// type = "process"
/// program = "python3"
/// args = ["execution/search_web.py", "--stdin"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvokeSpec {
    /// Run a subprocess, JSON input on stdin, JSON output on stdout.
    Process {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    /// Send the input as a JSON request body.
    Http {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
}

fn default_method() -> String {
    "POST".to_string()
}

// ---------------------------------------------------------------------------
// Registry source
// ---------------------------------------------------------------------------

/// On-disk shape of `tools.toml`: a `[tools.<name>]` table per descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RegistrySource {
    #[serde(default)]
    pub tools: BTreeMap<String, ToolDescriptor>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_source_toml() {
        let src = r#"
[tools.search]
description = "Web search"
idempotent = true
input_schema = { type = "object", required = ["query"] }

[tools.search.invoke]
type = "process"
program = "python3"
args = ["execution/search_web.py", "--stdin"]

[tools.summarize]
cost_class = "paid"
required_env = ["OPENAI_API_KEY"]

[tools.summarize.invoke]
type = "http"
url = "http://localhost:9000/summarize"
"#;
        let parsed: RegistrySource = toml::from_str(src).unwrap();
        assert_eq!(parsed.tools.len(), 2);

        let search = &parsed.tools["search"];
        assert!(search.idempotent);
        assert_eq!(search.cost_class, CostClass::Free);
        assert!(matches!(
            search.invoke,
            Some(InvokeSpec::Process { ref program, .. }) if program == "python3"
        ));

        let summarize = &parsed.tools["summarize"];
        assert_eq!(summarize.cost_class, CostClass::Paid);
        assert!(!summarize.idempotent);
        assert_eq!(summarize.required_env, vec!["OPENAI_API_KEY".to_string()]);
        match &summarize.invoke {
            Some(InvokeSpec::Http { method, .. }) => assert_eq!(method, "POST"),
            other => panic!("expected http invoke, got {other:?}"),
        }
    }

    #[test]
    fn test_cost_class_ordering() {
        assert!(CostClass::Paid > CostClass::Free);
        assert_eq!(CostClass::Free.max(CostClass::Paid), CostClass::Paid);
    }
}
