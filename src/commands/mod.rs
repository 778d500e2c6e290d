use anyhow::{Context as _, Result};
use colored::Colorize;
use reconcile::{JobOutcome, JobResult, WorkOrder};
use remote::Target;
use std::time::Duration;
use unitrepo::DirRepository;

use crate::Context;
use crate::config::{Config, TargetConfig};
use crate::registry;
use crate::state::PatchbayState;
use crate::ui;

pub mod apply;
pub mod plan;
pub mod resume;
pub mod status;
pub mod targets;

/// A configured target, opened
pub struct Opened<'c> {
    pub name: String,
    pub config: &'c TargetConfig,
    pub target: Box<dyn Target>,
}

pub fn load_config(ctx: &Context) -> Result<Config> {
    Config::load(ctx.config_path.as_deref())
}

pub fn open_target<'c>(config: &'c Config, name: &str) -> Result<Opened<'c>> {
    let target_config = config.target(name)?;
    let target = registry::open(name, target_config)?;
    Ok(Opened {
        name: name.to_string(),
        config: target_config,
        target,
    })
}

pub fn open_repository(config: &Config) -> Result<DirRepository> {
    let root = config.repository_root();
    DirRepository::open(&root)
        .with_context(|| format!("Could not open package repository {}", root.display()))
}

/// Print the operations of a work order
pub fn print_work_order(work_order: &WorkOrder) {
    for planned in &work_order.operations {
        ui::operation(&planned.operation, planned.size_bytes());
    }
}

/// Print per-operation outcomes in work order sequence
pub fn print_result(work_order: &WorkOrder, result: &JobResult) {
    for planned in &work_order.operations {
        let Some(outcome) = result.outcome(planned.unit()) else {
            continue;
        };
        let exit = outcome
            .exit_code
            .map(|code| format!(" (exit {code})"))
            .unwrap_or_default();
        println!(
            "  {:>3}  {} {}{}",
            outcome.sequence,
            planned.operation,
            ui::entry_status(outcome.status),
            exit.dimmed()
        );
    }

    for (unit, outcome) in result.failures() {
        if let Some(excerpt) = &outcome.log_excerpt {
            ui::section(&format!("Log: {unit}"));
            for line in excerpt.lines() {
                ui::dim(line);
            }
        }
    }
}

/// Print a pipeline error with what it means for the target
pub fn report_error(err: &reconcile::Error) {
    ui::error(&err.to_string());
    let category = err.category();
    ui::kv("Effect", category.description());
    ui::kv("Next", category.advice());
    if let Some((label, duration)) = waited(err) {
        ui::kv(label, &ui::format_duration(duration));
    }
    if let Some(excerpt) = err.excerpt() {
        ui::section("Last log output");
        for line in excerpt.lines() {
            ui::dim(line);
        }
    }
}

/// How long the agent was waited on, for errors that end a wait
fn waited(err: &reconcile::Error) -> Option<(&'static str, Duration)> {
    match err {
        reconcile::Error::AgentUnreachable { elapsed, .. } => Some(("Unreachable for", *elapsed)),
        reconcile::Error::AgentTimeout { waited, .. } => Some(("Waited", *waited)),
        _ => None,
    }
}

/// Settle a job: print it, record it and turn a failed verdict into an error
pub fn conclude(
    state: &mut PatchbayState,
    target: &str,
    outcome: &JobOutcome,
) -> Result<()> {
    let job_id = outcome.work_order.job_id.as_str();
    let Some(result) = &outcome.result else {
        return Ok(());
    };

    ui::section("Result");
    print_result(&outcome.work_order, result);
    println!();

    let verdict = outcome.verdict();
    state.mark_finished(target, job_id, verdict.is_ok(), &result.summary());
    state.touch()?;

    match verdict {
        Ok(()) => {
            ui::success(&format!("Job {} finished: {}", job_id, result.summary()));
            if !outcome.persisted {
                ui::warn("The target's manifest could not be updated; run 'patchbay status' to check");
            }
            Ok(())
        }
        Err(e) => {
            report_error(&e);
            Err(e).with_context(|| format!("Job {job_id} on {target} did not succeed"))
        }
    }
}

/// Record a job that stopped with an error
pub fn abort(state: &mut PatchbayState, target: &str, job_id: &str, err: reconcile::Error) -> Result<()> {
    report_error(&err);
    if err.category() == reconcile::ErrorCategory::Indeterminate {
        ui::info(&format!(
            "Job {job_id} may still be running. Run 'patchbay resume {target} --job-id {job_id}' later"
        ));
    } else {
        state.mark_finished(target, job_id, false, &err.to_string());
        state.touch()?;
    }
    Err(err).with_context(|| format!("Job {job_id} on {target} failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_errors_report_duration() {
        let err = reconcile::Error::AgentUnreachable {
            job_id: "job-1".to_string(),
            elapsed: Duration::from_secs(605),
            last_log: None,
        };
        let (label, duration) = waited(&err).unwrap();
        assert_eq!(label, "Unreachable for");
        assert_eq!(ui::format_duration(duration), "10m 5s");

        let err = reconcile::Error::AgentTimeout {
            job_id: "job-1".to_string(),
            waited: Duration::from_secs(7200),
        };
        assert_eq!(waited(&err).map(|(_, d)| ui::format_duration(d)).as_deref(), Some("2h 0m 0s"));

        let err = reconcile::Error::InvalidJobId {
            job_id: "a b".to_string(),
        };
        assert!(waited(&err).is_none());
    }
}
