// Copyright 2025 Martin Pool

//! Command-line surface: `swemutate run|list-mutants|resume`.
//!
//! Grounded on `annotation.rs`'s `clap::ValueEnum` usage and the
//! `Args`/`clap::Parser` shape the teacher's own test suite exercises
//! (`timeouts.rs`, `config.rs`), generalized from the teacher's single
//! flat `Args` struct to subcommands since this crate has three distinct
//! entry points rather than one.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Mutation-testing dataset synthesis pipeline.
#[derive(Parser, Debug)]
#[command(name = "swemutate", version, about)]
pub struct Cli {
    /// Path to a `.swemutate.toml` config file. Defaults to `.swemutate.toml`
    /// in the current directory if present, otherwise built-in defaults.
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive the full per-commit pipeline (C10) over one repository.
    Run(RunArgs),

    /// Dry-run C8's target discovery and print candidate mutation sites
    /// without calling a model or a container.
    ListMutants(ListMutantsArgs),

    /// Re-enter an interrupted run, skipping targets already recorded in
    /// its journal.
    Resume(ResumeArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Repository slug, e.g. `owner/name`.
    #[arg(long)]
    pub repo: String,

    /// Git remote URL to clone from if not already cached locally.
    #[arg(long)]
    pub remote_url: Option<String>,

    /// Number of commits to sample deterministically from the repository's
    /// known-commit list.
    #[arg(long, default_value_t = 5)]
    pub commits: usize,

    /// Seed for deterministic commit sampling and weighted mutation draws.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Output directory for journals, snapshots, and transcripts.
    #[arg(long)]
    pub out: Utf8PathBuf,

    /// Total mutation budget per commit, split across strategies by
    /// `StrategyQuota`.
    #[arg(long, default_value_t = 20)]
    pub mutations_per_commit: usize,
}

#[derive(Parser, Debug)]
pub struct ListMutantsArgs {
    /// Path to a local checkout to scan for candidate targets.
    #[arg(long)]
    pub repo: Utf8PathBuf,

    /// Restrict listing to a single source file, relative to `repo`.
    #[arg(long)]
    pub target: Option<Utf8PathBuf>,

    /// Emit machine-readable JSON instead of a human-readable listing.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ResumeArgs {
    /// The run directory a previous `run` invocation wrote its journal and
    /// snapshots into.
    #[arg(long)]
    pub out: Utf8PathBuf,
}

#[cfg(test)]
mod test {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_subcommand_parses_required_flags() {
        let cli = Cli::parse_from([
            "swemutate",
            "run",
            "--repo",
            "owner/name",
            "--commits",
            "3",
            "--seed",
            "42",
            "--out",
            "/tmp/out",
        ]);
        let Command::Run(run) = cli.command else {
            panic!("expected Run subcommand");
        };
        assert_eq!(run.repo, "owner/name");
        assert_eq!(run.commits, 3);
        assert_eq!(run.seed, 42);
    }

    #[test]
    fn list_mutants_defaults_json_to_false() {
        let cli = Cli::parse_from(["swemutate", "list-mutants", "--repo", "/tmp/repo"]);
        let Command::ListMutants(args) = cli.command else {
            panic!("expected ListMutants subcommand");
        };
        assert!(!args.json);
    }

    #[test]
    fn resume_requires_out() {
        let result = Cli::try_parse_from(["swemutate", "resume"]);
        assert!(result.is_err());
    }
}
