use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::state::PatchbayState;
use crate::ui;

use super::load_config;

pub fn run(ctx: &Context) -> Result<()> {
    let config = load_config(ctx)?;
    let state = PatchbayState::load()?;

    ui::header("Targets");
    if config.targets.is_empty() {
        ui::info("No targets configured");
        ui::dim("Add [targets.NAME] sections to ~/.config/patchbay/config.toml");
        return Ok(());
    }

    for (name, target) in &config.targets {
        let location = target.root.as_deref().unwrap_or("in-process");
        println!("  {} {} {}", name.bold(), target.kind.cyan(), location.dimmed());
        if let Some(variant) = &target.variant {
            ui::kv("  Variant", variant);
        }
        if let Some(model) = &target.model {
            ui::kv("  Model", model);
        }
        if let Some(record) = state.last_job(name) {
            let verdict = match (&record.verdict, record.succeeded) {
                (Some(v), true) => v.green().to_string(),
                (Some(v), false) => v.red().to_string(),
                (None, _) => "in progress".yellow().to_string(),
            };
            ui::kv("  Last job", &format!("{} {}", record.job_id, verdict));
        }
    }

    println!();
    ui::dim(&format!("Repository: {}", config.repository_root().display()));
    Ok(())
}
