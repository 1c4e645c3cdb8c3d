//! Step progress bar for `start`, `resume` and `recover`.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use waypoint_core::workflow::executor::Execution;
use waypoint_core::workflow::runner::RunObserver;
use waypoint_types::instance::WorkflowInstance;
use waypoint_types::outcome::Outcome;
use waypoint_types::workflow::StepSpec;

/// Draws one bar per driven instance on stderr.
pub struct StepProgress {
    bar: ProgressBar,
}

impl StepProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar }
    }

    /// Stop drawing and remove the bar.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for StepProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl RunObserver for StepProgress {
    fn instance_started(&self, instance: &WorkflowInstance) {
        self.bar.reset();
        self.bar.set_length(instance.total_steps as u64);
        self.bar.set_position(instance.completed_steps.len() as u64);
        self.bar.set_message(instance.workflow_name.clone());
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn instance_finished(&self, _instance: &WorkflowInstance) {
        self.bar.finish_and_clear();
    }

    fn step_started(&self, _index: usize, step: &StepSpec) {
        self.bar.set_message(format!("{} ({})", step.name, step.tool));
    }

    fn step_finished(&self, _index: usize, step: &StepSpec, execution: &Execution) {
        let retries = execution.attempts.len().saturating_sub(1);
        match &execution.outcome {
            Outcome::Success { tool, .. } => {
                if tool != &step.tool {
                    self.bar.println(format!(
                        "  {} {} succeeded with fallback '{}'",
                        style("~").yellow(),
                        step.name,
                        tool
                    ));
                } else if retries > 0 {
                    self.bar.println(format!(
                        "  {} {} succeeded after {} retr{}",
                        style("~").yellow(),
                        step.name,
                        retries,
                        if retries == 1 { "y" } else { "ies" }
                    ));
                }
                self.bar.inc(1);
            }
            Outcome::RetryableFailure(reason) | Outcome::FatalFailure(reason) => {
                self.bar.println(format!(
                    "  {} {} failed: {}",
                    style("✗").red(),
                    step.name,
                    reason
                ));
            }
        }
    }
}
