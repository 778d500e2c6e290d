use anyhow::Result;
use reconcile::{DiffSummary, Reconciler};

use crate::Context;
use crate::cli::PlanArgs;
use crate::progress::TerminalProgress;
use crate::ui;

use super::{load_config, open_repository, open_target, print_work_order, report_error};

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let config = load_config(ctx)?;
    let opened = open_target(&config, &args.target)?;
    let model = opened.config.load_model(args.model.as_deref())?;
    let repo = open_repository(&config)?;
    let options = config.options_for(opened.config);

    let mut progress = TerminalProgress::new(ctx.quiet);
    let (session, work_order) = match Reconciler::new(&repo, opened.target.as_ref())
        .plan(&model, &options, &mut progress)
    {
        Ok(planned) => planned,
        Err(e) => {
            report_error(&e);
            return Err(e.into());
        }
    };
    drop(progress);

    ui::header(&format!("Plan for {}", opened.name));
    ui::kv("Target", &opened.target.describe());
    ui::kv("Flavor", session.flavor());
    ui::kv("Installed", &session.manifest().len().to_string());
    ui::kv("Desired", &model.len().to_string());

    if work_order.is_empty() {
        println!();
        ui::success("Target already matches the model");
        return Ok(());
    }

    let summary = DiffSummary::from_operations(&work_order.operations());
    ui::section("Operations");
    print_work_order(&work_order);
    println!();
    ui::info(&format!(
        "{} ({} to copy, {} critical)",
        summary,
        ui::format_size(work_order.total_bytes()),
        work_order.critical_count()
    ));
    Ok(())
}
