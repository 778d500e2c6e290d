//! Terminal progress for reconciliation jobs

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{AgentStatus, ProgressCallback, Stage};
use std::time::Duration;
use unitrepo::PackageRef;

use crate::ui;

const STAGES: usize = 7;

fn stage_number(stage: Stage) -> usize {
    match stage {
        Stage::Discover => 1,
        Stage::Diff => 2,
        Stage::Plan => 3,
        Stage::Transfer => 4,
        Stage::Start => 5,
        Stage::Wait => 6,
        Stage::Collect => 7,
    }
}

/// Stage lines plus a byte bar while copying and a spinner while waiting
pub struct TerminalProgress {
    quiet: bool,
    bar: Option<ProgressBar>,
    spinner: Option<ProgressBar>,
    current: Option<(PackageRef, u64)>,
    done_bytes: u64,
}

impl TerminalProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            bar: None,
            spinner: None,
            current: None,
            done_bytes: 0,
        }
    }

    fn new_bar(&self, total: u64) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb
    }

    fn new_spinner(&self) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {elapsed_precise} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }

    fn finish(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_stage(&mut self, stage: Stage, detail: &str) {
        self.finish();
        if !self.quiet {
            ui::step(stage_number(stage), STAGES, &format!("{} {}", stage, detail.dimmed()));
        }
    }

    fn on_transfer_start(&mut self, units: usize, total_bytes: u64) {
        log::info!("Copying {} payloads ({})", units, ui::format_size(total_bytes));
        self.current = None;
        self.done_bytes = 0;
        self.bar = Some(self.new_bar(total_bytes));
    }

    fn on_transfer_progress(&mut self, unit: &PackageRef, copied: u64, total: u64) {
        match &self.current {
            Some((current, _)) if current == unit => {}
            _ => {
                if let Some((_, previous_total)) = self.current.take() {
                    self.done_bytes += previous_total;
                }
                self.current = Some((unit.clone(), total));
                if let Some(pb) = &self.bar {
                    pb.set_message(unit.to_string());
                }
            }
        }
        if let Some(pb) = &self.bar {
            pb.set_position(self.done_bytes + copied);
        }
    }

    fn on_transfer_complete(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_with_message("copied");
        }
        self.current = None;
    }

    fn on_agent_status(&mut self, status: AgentStatus, log_tail: Option<&str>) {
        if self.spinner.is_none() {
            self.spinner = Some(self.new_spinner());
        }
        let label = match status {
            AgentStatus::Rebooting | AgentStatus::Unreachable => status.label().yellow().to_string(),
            AgentStatus::Stopped => status.label().green().to_string(),
            _ => status.label().to_string(),
        };
        let message = match log_tail {
            Some(line) => format!("{} {}", label, line.dimmed()),
            None => label,
        };
        if let Some(pb) = &self.spinner {
            pb.set_message(message);
        }
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.finish();
    }
}
