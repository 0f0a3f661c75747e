// Copyright 2021 - 2025 Martin Pool

//! `swemutate`: synthesize validated bug-fix datasets by mutating a
//! repository's own source and checking the result against its own test
//! suite inside per-project containers.

use std::io;
use std::process::exit;

use anyhow::Result;
use clap::Parser;
use swemutate::cli::{Cli, Command};
use swemutate::{config, exit_code, interrupt, logging, orchestrator};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _logging_guard = logging::init(log_dir_for(&cli).as_deref()).expect("initialize logging");
    interrupt::install_handler();

    let code = match dispatch(cli).await {
        Ok(()) => exit_code::SUCCESS,
        Err(e) => {
            if let Some(pipeline_err) = e.downcast_ref::<swemutate::error::PipelineError>() {
                eprintln!("error: {pipeline_err:#}");
                pipeline_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                exit_code::SOFTWARE
            }
        }
    };
    exit(code);
}

fn log_dir_for(cli: &Cli) -> Option<camino::Utf8PathBuf> {
    match &cli.command {
        Command::Run(args) => Some(args.out.clone()),
        Command::Resume(args) => Some(args.out.clone()),
        Command::ListMutants(_) => None,
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = config::Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run(args) => orchestrator::run(&args, &config).await,
        Command::Resume(args) => orchestrator::resume(&args, &config).await,
        Command::ListMutants(args) => {
            let targets = orchestrator::list_mutants(&args.repo, args.target.as_deref())?;
            if args.json {
                serde_json::to_writer_pretty(io::BufWriter::new(io::stdout()), &targets)?;
                println!();
            } else {
                for target in &targets {
                    println!("{:?} {}", target.kind, target.nodeid());
                }
            }
            Ok(())
        }
    }
}
