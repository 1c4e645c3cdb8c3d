//! CLI catalog subcommands: registered tools, workflow definitions and the
//! JSON Schemas of their file formats.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::json;

use waypoint_core::tool::registry::RegistryError;
use waypoint_types::tool::{CostClass, InvokeSpec, RegistrySource, ToolDescriptor};
use waypoint_types::workflow::WorkflowDefinition;

use super::SchemaKind;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

pub fn list_tools(state: &AppState, json: bool) -> Result<()> {
    let mut tools: Vec<&ToolDescriptor> = state.registry.iter().collect();
    tools.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        let out: Vec<_> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "cost_class": t.cost_class.to_string(),
                    "idempotent": t.idempotent,
                    "transport": transport(t),
                    "required_env": t.required_env,
                    "missing_env": missing_env(state, t),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if tools.is_empty() {
        println!();
        println!("  No tools registered.");
        println!("  Declare them in: {}", style(state.tools_file.display()).dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Cost"),
            Cell::new("Idempotent"),
            Cell::new("Transport"),
            Cell::new("Environment"),
        ]);

    for t in &tools {
        let cost = match t.cost_class {
            CostClass::Paid => Cell::new("paid").fg(Color::Yellow),
            CostClass::Free => Cell::new("free"),
        };
        let missing = missing_env(state, t);
        let env = if missing.is_empty() {
            Cell::new("ready").fg(Color::Green)
        } else {
            Cell::new(format!("missing {}", missing.join(", "))).fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&t.name),
            cost,
            Cell::new(if t.idempotent { "yes" } else { "no" }),
            Cell::new(transport(t)),
            env,
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

fn missing_env(state: &AppState, tool: &ToolDescriptor) -> Vec<String> {
    match state.registry.validate_environment(tool) {
        Err(RegistryError::MissingEnv { missing, .. }) => missing,
        _ => Vec::new(),
    }
}

fn transport(tool: &ToolDescriptor) -> String {
    match &tool.invoke {
        Some(InvokeSpec::Process { program, .. }) => format!("process: {program}"),
        Some(InvokeSpec::Http { url, method, .. }) => format!("http: {method} {url}"),
        None => "in-process".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

pub fn list_workflows(state: &AppState, json: bool) -> Result<()> {
    let mut defs: Vec<_> = state.catalog.iter().collect();
    defs.sort_by(|a, b| a.1.name.cmp(&b.1.name));

    if json {
        let out: Vec<_> = defs
            .iter()
            .map(|(path, d)| {
                json!({
                    "name": d.name,
                    "description": d.description,
                    "steps": d.steps.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
                    "path": path.display().to_string(),
                    "tools_known": state.registry.ensure_workflow(d).is_ok(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows found.");
        println!("  Add YAML definitions to: {}", style(state.workflows_dir.display()).dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Steps"),
            Cell::new("Tools"),
            Cell::new("File"),
        ]);

    for (path, d) in &defs {
        let steps = d
            .steps
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(" → ");
        let tools = match state.registry.ensure_workflow(d) {
            Ok(()) => Cell::new("ok").fg(Color::Green),
            Err(e) => Cell::new(e.to_string()).fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(&d.name),
            Cell::new(steps),
            tools,
            Cell::new(path.display()),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

pub fn print_schema(kind: SchemaKind) -> Result<()> {
    println!("{}", schema_json(kind)?);
    Ok(())
}

fn schema_json(kind: SchemaKind) -> Result<String> {
    let schema = match kind {
        SchemaKind::Workflow => schemars::schema_for!(WorkflowDefinition),
        SchemaKind::Tools => schemars::schema_for!(RegistrySource),
    };
    Ok(serde_json::to_string_pretty(&schema)?)
}
