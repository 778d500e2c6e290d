use anyhow::{Context as _, Result};
use reconcile::{DiffSummary, Reconciler};

use crate::Context;
use crate::cli::ApplyArgs;
use crate::progress::TerminalProgress;
use crate::state::PatchbayState;
use crate::ui;

use super::{abort, conclude, load_config, open_repository, open_target, print_work_order, report_error};

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let config = load_config(ctx)?;
    let opened = open_target(&config, &args.target)?;
    let model = opened.config.load_model(args.model.as_deref())?;
    let repo = open_repository(&config)?;
    let mut options = config.options_for(opened.config);
    options.job_id = args.job_id;

    let reconciler = Reconciler::new(&repo, opened.target.as_ref());
    let mut progress = TerminalProgress::new(ctx.quiet);

    let (_, work_order) = match reconciler.plan(&model, &options, &mut progress) {
        Ok(planned) => planned,
        Err(e) => {
            report_error(&e);
            return Err(e.into());
        }
    };
    drop(progress);

    if work_order.is_empty() {
        ui::success(&format!("{} already matches the model", opened.name));
        return Ok(());
    }

    ui::header(&format!("Job {} on {}", work_order.job_id, opened.name));
    print_work_order(&work_order);
    println!();
    ui::info(&format!(
        "{} ({} to copy)",
        DiffSummary::from_operations(&work_order.operations()),
        ui::format_size(work_order.total_bytes())
    ));

    if args.dry_run {
        ui::info("Dry run, nothing was changed");
        return Ok(());
    }

    if !args.yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Apply {} operations to {}?", work_order.len(), opened.name))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

        if !confirmed {
            ui::info("Cancelled");
            return Ok(());
        }
    }

    // Reuse the planned id so the recorded job matches what was shown.
    let job_id = work_order.job_id.clone();
    options.job_id = Some(job_id.clone());

    let mut state = PatchbayState::load()?;
    state.mark_started(&opened.name, &job_id);
    state.touch()?;

    let mut progress = TerminalProgress::new(ctx.quiet);
    let result = reconciler.run(&model, &options, &mut progress);
    drop(progress);

    match result {
        Ok(outcome) => {
            if let Some(report) = &outcome.transferred {
                log::info!(
                    "Copied {} payloads ({}) to {}",
                    report.units,
                    ui::format_size(report.bytes),
                    report.request_path
                );
            }
            conclude(&mut state, &opened.name, &outcome)
        }
        Err(e) => abort(&mut state, &opened.name, &job_id, e),
    }
}
