use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "patchbay")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Bring managed machines to a desired set of installed units", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file
    #[arg(long, global = true, env = "PATCHBAY_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the operations a job would run
    Plan(PlanArgs),

    /// Reconcile a target with its model
    Apply(ApplyArgs),

    /// Wait for and collect a job started earlier
    Resume(ResumeArgs),

    /// Show agent status, installed units and the last job
    Status {
        /// Target name from the configuration
        target: String,
    },

    /// List configured targets
    Targets,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PlanArgs {
    /// Target name from the configuration
    pub target: String,

    /// Model file to use instead of the configured one
    #[arg(long, value_name = "FILE")]
    pub model: Option<PathBuf>,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Target name from the configuration
    pub target: String,

    /// Model file to use instead of the configured one
    #[arg(long, value_name = "FILE")]
    pub model: Option<PathBuf>,

    /// Job id to use instead of a generated one
    #[arg(long, value_name = "ID")]
    pub job_id: Option<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Plan only, do not touch the target
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct ResumeArgs {
    /// Target name from the configuration
    pub target: String,

    /// Job to resume (defaults to the target's last job)
    #[arg(long, value_name = "ID")]
    pub job_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::parse_from(["patchbay", "-vv", "apply", "web01", "--yes", "--job-id", "j1"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply(args) => {
                assert_eq!(args.target, "web01");
                assert!(args.yes);
                assert!(!args.dry_run);
                assert_eq!(args.job_id.as_deref(), Some("j1"));
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["patchbay", "targets", "-q", "--config", "/tmp/p.toml"]);
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));
    }
}
