use anyhow::{Context as _, Result};
use reconcile::Reconciler;

use crate::Context;
use crate::cli::ResumeArgs;
use crate::progress::TerminalProgress;
use crate::state::PatchbayState;
use crate::ui;

use super::{abort, conclude, load_config, open_repository, open_target};

pub fn run(ctx: &Context, args: ResumeArgs) -> Result<()> {
    let config = load_config(ctx)?;
    let opened = open_target(&config, &args.target)?;
    let repo = open_repository(&config)?;
    let options = config.options_for(opened.config);

    let mut state = PatchbayState::load()?;
    let job_id = match args.job_id {
        Some(id) => id,
        None => {
            let record = state.last_job(&opened.name).with_context(|| {
                format!("No job recorded for {}; pass --job-id", opened.name)
            })?;
            if !record.is_open() {
                ui::warn(&format!(
                    "Job {} already finished; collecting its result again",
                    record.job_id
                ));
            }
            record.job_id.clone()
        }
    };

    ui::info(&format!("Resuming job {} on {}", job_id, opened.name));
    let mut progress = TerminalProgress::new(ctx.quiet);
    let result = Reconciler::new(&repo, opened.target.as_ref()).resume(&job_id, &options, &mut progress);
    drop(progress);

    match result {
        Ok(outcome) => conclude(&mut state, &opened.name, &outcome),
        Err(e) => abort(&mut state, &opened.name, &job_id, e),
    }
}
