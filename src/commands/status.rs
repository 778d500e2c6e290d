use anyhow::Result;
use colored::Colorize;
use reconcile::agent::{AGENT_PATH, STATUS_KEY};
use reconcile::{AgentStatus, TargetSession};
use remote::{ControlChannel, RetryConfig};

use crate::Context;
use crate::state::PatchbayState;
use crate::ui;

use super::{load_config, open_target};

pub fn run(ctx: &Context, target: &str) -> Result<()> {
    let config = load_config(ctx)?;
    let opened = open_target(&config, target)?;
    let state = PatchbayState::load()?;
    let last_job = state.last_job(&opened.name);

    ui::header(&format!("Status of {}", opened.name));
    ui::kv("Target", &opened.target.describe());

    let session = match TargetSession::discover(opened.target.as_ref(), &RetryConfig::default()) {
        Ok(session) => session,
        Err(e) => {
            ui::warn(&format!("Could not read target facts: {e}"));
            return Ok(());
        }
    };
    let flavor = if session.flavor().is_empty() { "-" } else { session.flavor() };
    ui::kv("Flavor", flavor);
    ui::kv("Update dir", session.update_dir());

    ui::section("Agent");
    match opened.target.read_key_opt(AGENT_PATH, STATUS_KEY) {
        Ok(Some(flag)) => {
            let job = last_job.map(|r| r.job_id.as_str()).unwrap_or_default();
            let status = AgentStatus::parse(&flag, job);
            ui::kv("Status", &format!("{} {}", status.label(), format!("({flag})").dimmed()));
        }
        Ok(None) => ui::kv("Status", &"never commanded".dimmed().to_string()),
        Err(e) => ui::kv("Status", &format!("{} {}", "unknown".yellow(), e.to_string().dimmed())),
    }

    ui::section("Installed");
    if session.manifest().is_empty() {
        ui::dim("nothing recorded");
    }
    for entry in session.manifest().entries() {
        let when = entry
            .installed_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {} {}", entry.unit, when.dimmed());
    }

    ui::section("Last job");
    match last_job {
        Some(record) => {
            ui::kv("Id", &record.job_id);
            ui::kv("Started", &record.started_at.to_rfc3339());
            match (&record.finished_at, &record.verdict) {
                (Some(finished), Some(verdict)) => {
                    ui::kv("Finished", &finished.to_rfc3339());
                    let verdict = if record.succeeded {
                        verdict.green()
                    } else {
                        verdict.red()
                    };
                    ui::kv("Verdict", &verdict.to_string());
                }
                _ => ui::kv("Finished", &"not yet; use 'patchbay resume'".yellow().to_string()),
            }
        }
        None => ui::dim("none"),
    }

    println!();
    Ok(())
}
