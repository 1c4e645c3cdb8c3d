//! CLI instance subcommands.
//!
//! Provides start, status, resume, cancel and recover operations over
//! workflow instances.

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::{style, Term};
use dialoguer::Confirm;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use waypoint_core::repository::checkpoint::CheckpointRepository;
use waypoint_core::workflow::resume::{Recovery, ResumeController, ResumeError, ResumeMode};
use waypoint_core::workflow::runner::RunReport;
use waypoint_types::instance::{InstanceStatus, WorkflowInstance};

use crate::exit::{UsageError, WorkflowFailed};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

pub async fn handle_start(
    workflow: &str,
    params: &[String],
    params_json: Option<&str>,
    state: &AppState,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let params = parse_params(params_json, params)?;
    state.ensure_catalog()?;
    let def = state.catalog.find(workflow)?;

    tracing::info!(workflow = %def.name, steps = def.steps.len(), "starting workflow");
    let report = state.runner.start(&def, params).await?;
    print_report("Started", &report, json, quiet)?;
    failed_to_err(&report)
}

/// Merge `--params` (a JSON object) with `--param key=value` pairs.
/// Values that parse as JSON are taken as JSON, anything else as a string.
pub fn parse_params(params_json: Option<&str>, pairs: &[String]) -> Result<Value> {
    let mut map = match params_json {
        None => Map::new(),
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(UsageError("--params must be a JSON object".to_string()).into()),
            Err(e) => return Err(UsageError(format!("invalid --params JSON: {e}")).into()),
        },
    };

    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| UsageError(format!("--param '{pair}' is not KEY=VALUE")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(UsageError(format!("--param '{pair}' has an empty key")).into());
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }

    Ok(Value::Object(map))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn handle_status(target: Option<&str>, state: &AppState, json: bool) -> Result<()> {
    let repo = state.runner.checkpoints().repo();

    let (title, instances) = match target {
        None => (
            "Active and failed instances".to_string(),
            repo.list_active_or_failed().await?,
        ),
        Some(t) => match t.parse::<Uuid>() {
            Ok(id) => {
                let instance = repo.load(id).await?;
                return display_single_instance(&instance, json);
            }
            Err(_) => {
                let instances = repo.list_for_workflow(t).await?;
                if instances.is_empty() {
                    // Neither a known workflow nor one with history.
                    state.catalog.get(t)?;
                }
                (format!("Instances of workflow '{}'", style(t).cyan()), instances)
            }
        },
    };

    if json {
        let out: Vec<_> = instances.iter().map(instance_summary).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!();
        match target {
            None => println!("  No active or failed instances."),
            Some(t) => println!("  No instances for workflow '{t}'."),
        }
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Instance").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Status"),
            Cell::new("Progress"),
            Cell::new("Updated"),
            Cell::new("Error"),
        ]);

    for inst in &instances {
        table.add_row(vec![
            Cell::new(inst.id),
            Cell::new(&inst.workflow_name),
            format_status(inst.status),
            Cell::new(format!("{}/{}", inst.completed_steps.len(), inst.total_steps)),
            Cell::new(inst.updated_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(inst.error.as_deref().unwrap_or("-")),
        ]);
    }

    println!();
    println!("  {title}");
    println!();
    println!("{table}");
    println!();

    Ok(())
}

fn display_single_instance(inst: &WorkflowInstance, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(inst)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Instance:").bold(),
        style(inst.id).cyan()
    );
    println!("  Workflow: {}", style(&inst.workflow_name).cyan());
    println!("  Status: {}", status_style(inst.status));
    println!(
        "  Progress: {}/{} ({:.0}%)",
        inst.completed_steps.len(),
        inst.total_steps,
        inst.progress() * 100.0
    );
    println!("  Created: {}", inst.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", inst.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if inst.cancel_requested && inst.is_active() {
        println!("  {}", style("Cancellation requested").yellow());
    }

    if !inst.completed_steps.is_empty() {
        println!();
        for step in &inst.completed_steps {
            println!(
                "  {} {:>2}. {} {}",
                style("✓").green(),
                step.index + 1,
                step.name,
                style(step.completed_at.format("%H:%M:%S").to_string()).dim()
            );
        }
    }
    if let Some(failed) = &inst.failed_step {
        match inst.last_completed_index() {
            Some(i) => println!("  Last completed step index: {i}"),
            None => println!("  No step completed"),
        }
        println!(
            "  {} {:>2}. {} {}",
            style("✗").red(),
            failed.index + 1,
            failed.name,
            style(format!("[{}]", failed.kind)).dim()
        );
    }
    if let Some(err) = &inst.error {
        println!();
        println!("  Error: {}", style(err).red());
    }
    if inst.status == InstanceStatus::Failed {
        println!();
        println!(
            "  Resume with: {}",
            style(format!("waypoint resume {}", inst.id)).dim()
        );
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

pub async fn handle_resume(
    instance: &str,
    yes: bool,
    state: &AppState,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let id = parse_instance_id(instance)?;
    let current = state.runner.checkpoints().repo().load(id).await?;
    let def = state
        .catalog
        .get(&current.workflow_name)
        .with_context(|| format!("instance {id} belongs to workflow '{}'", current.workflow_name))?;

    let mode = if current.status == InstanceStatus::Failed {
        if confirm_reopen(&current, yes, json)? {
            ResumeMode::ReopenFailed
        } else {
            return Err(ResumeError::NeedsReopen(id).into());
        }
    } else {
        ResumeMode::ActiveOnly
    };

    let report = ResumeController::new(&state.runner)
        .resume(def, id, mode)
        .await?;
    print_report("Resumed", &report, json, quiet)?;
    failed_to_err(&report)
}

/// Ask before reopening a failed instance. `--yes` skips the prompt; JSON
/// output and non-interactive stderr never prompt.
fn confirm_reopen(inst: &WorkflowInstance, yes: bool, json: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if json || !Term::stderr().is_term() {
        return Ok(false);
    }

    let step = inst
        .failed_step
        .as_ref()
        .map(|f| f.name.as_str())
        .unwrap_or("?");
    let confirmed = Confirm::new()
        .with_prompt(format!(
            "Instance failed at step '{}'. Reopen and run it again?",
            style(step).yellow().bold()
        ))
        .default(false)
        .interact()?;
    Ok(confirmed)
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

pub async fn handle_cancel(instance: &str, now: bool, state: &AppState, json: bool) -> Result<()> {
    let id = parse_instance_id(instance)?;

    let inst = if now {
        let current = state.runner.checkpoints().repo().load(id).await?;
        let def = state.catalog.get(&current.workflow_name).with_context(|| {
            format!("instance {id} belongs to workflow '{}'", current.workflow_name)
        })?;
        state.runner.cancel_now(def, id).await?
    } else {
        state.runner.cancel(id).await?
    };

    if json {
        let out = json!({
            "instance_id": inst.id.to_string(),
            "status": inst.status.as_str(),
            "cancel_requested": inst.cancel_requested,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    if now && inst.status == InstanceStatus::Completed {
        println!(
            "  {} Instance {} had recorded every step and is now completed",
            style("*").green().bold(),
            style(inst.id).cyan()
        );
    } else if now {
        println!(
            "  {} Cancelled instance {}",
            style("*").green().bold(),
            style(inst.id).cyan()
        );
    } else {
        println!(
            "  {} Cancellation requested for {}",
            style("*").green().bold(),
            style(inst.id).cyan()
        );
        println!("  The instance stops at its next step boundary.");
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Recover
// ---------------------------------------------------------------------------

pub async fn handle_recover(state: &AppState, json: bool, quiet: bool) -> Result<()> {
    let entries = ResumeController::new(&state.runner)
        .recover(&state.catalog)
        .await?;

    let failed: Vec<Uuid> = entries
        .iter()
        .filter(|e| match &e.recovery {
            Recovery::Resumed(report) => !report.succeeded(),
            Recovery::Errored(_) => true,
            Recovery::Skipped { .. } => false,
        })
        .map(|e| e.instance_id)
        .collect();

    if json {
        let out: Vec<_> = entries
            .iter()
            .map(|e| {
                let (outcome, detail) = match &e.recovery {
                    Recovery::Resumed(r) => (r.instance.status.as_str(), r.instance.error.clone()),
                    Recovery::Skipped { reason } => ("skipped", Some(reason.clone())),
                    Recovery::Errored(err) => ("error", Some(err.to_string())),
                };
                json!({
                    "instance_id": e.instance_id.to_string(),
                    "workflow": e.workflow,
                    "outcome": outcome,
                    "detail": detail,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !quiet {
        if entries.is_empty() {
            println!();
            println!("  No interrupted instances.");
            println!();
        } else {
            let mut table = Table::new();
            table
                .load_preset(presets::UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("Instance").fg(Color::Cyan),
                    Cell::new("Workflow"),
                    Cell::new("Outcome"),
                    Cell::new("Detail"),
                ]);
            for e in &entries {
                let (cell, detail) = match &e.recovery {
                    Recovery::Resumed(r) => (
                        format_status(r.instance.status),
                        r.instance
                            .error
                            .clone()
                            .unwrap_or_else(|| format!("{} step(s) run", r.steps_executed)),
                    ),
                    Recovery::Skipped { reason } => {
                        (Cell::new("skipped").fg(Color::DarkYellow), reason.clone())
                    }
                    Recovery::Errored(err) => (Cell::new("error").fg(Color::Red), err.to_string()),
                };
                table.add_row(vec![
                    Cell::new(e.instance_id),
                    Cell::new(&e.workflow),
                    cell,
                    Cell::new(detail),
                ]);
            }
            println!();
            println!("{table}");
            println!();
        }
    }

    match failed.first() {
        None => Ok(()),
        Some(first) => Err(WorkflowFailed {
            instance_id: *first,
            reason: format!("{} recovered instance(s) did not complete", failed.len()),
        }
        .into()),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_instance_id(raw: &str) -> Result<Uuid> {
    raw.parse::<Uuid>()
        .map_err(|_| UsageError(format!("invalid instance ID: '{raw}'")).into())
}

fn failed_to_err(report: &RunReport) -> Result<()> {
    if report.instance.status == InstanceStatus::Failed {
        return Err(WorkflowFailed {
            instance_id: report.instance.id,
            reason: report
                .instance
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        }
        .into());
    }
    Ok(())
}

fn print_report(verb: &str, report: &RunReport, json: bool, quiet: bool) -> Result<()> {
    let inst = &report.instance;
    if json {
        let mut out = instance_summary(inst);
        out["steps_executed"] = json!(report.steps_executed);
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    println!();
    let marker = match inst.status {
        InstanceStatus::Completed => style("*").green().bold(),
        InstanceStatus::Failed => style("✗").red().bold(),
        InstanceStatus::InProgress => style("~").yellow().bold(),
    };
    println!(
        "  {} {} workflow '{}'",
        marker,
        verb,
        style(&inst.workflow_name).cyan()
    );
    println!("  Instance: {}", inst.id);
    println!("  Status: {}", status_style(inst.status));
    println!(
        "  Progress: {}/{} ({} step(s) run now)",
        inst.completed_steps.len(),
        inst.total_steps,
        report.steps_executed
    );
    if let Some(err) = &inst.error {
        println!("  Error: {}", style(err).red());
        println!();
        println!(
            "  Resume with: {}",
            style(format!("waypoint resume {}", inst.id)).dim()
        );
    }
    println!();
    Ok(())
}

fn instance_summary(inst: &WorkflowInstance) -> Value {
    json!({
        "instance_id": inst.id.to_string(),
        "workflow": inst.workflow_name,
        "status": inst.status.as_str(),
        "current_step": inst.current_step,
        "total_steps": inst.total_steps,
        "last_completed_step": inst.last_completed_index(),
        "failed_step": inst.failed_step.as_ref().map(|f| json!({
            "index": f.index,
            "name": f.name,
            "kind": f.kind.as_str(),
        })),
        "error": inst.error,
        "updated_at": inst.updated_at.to_rfc3339(),
    })
}

fn status_style(status: InstanceStatus) -> console::StyledObject<&'static str> {
    match status {
        InstanceStatus::InProgress => style(status.as_str()).blue(),
        InstanceStatus::Completed => style(status.as_str()).green(),
        InstanceStatus::Failed => style(status.as_str()).red(),
    }
}

fn format_status(status: InstanceStatus) -> Cell {
    match status {
        InstanceStatus::InProgress => Cell::new("in_progress").fg(Color::Blue),
        InstanceStatus::Completed => Cell::new("completed").fg(Color::Green),
        InstanceStatus::Failed => Cell::new("failed").fg(Color::Red),
    }
}
