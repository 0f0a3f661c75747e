// Copyright 2025 Martin Pool

//! `swemutate`: synthesize validated bug-fix datasets by mutating a
//! repository's own source and checking the result against its own test
//! suite inside per-project containers.
//!
//! The ten components (C1-C10) are organized as sibling modules, in their
//! dependency order: [`source_transform`]/[`textedit`] (C1), [`patch`] (C2),
//! [`repository`] (C3), [`container`] (C4), [`test_log`] (C5), [`callgraph`]
//! (C6), [`empty_body_targeter`] (C7), [`strategy`] (C8), [`mutator`] (C9),
//! [`orchestrator`]/[`journal`] (C10), plus the ambient stack ([`cli`],
//! [`config`], [`logging`], [`artifacts`], [`error`], [`exit_code`],
//! [`interrupt`]).

pub mod artifacts;
pub mod callgraph;
pub mod cli;
pub mod config;
pub mod container;
pub mod empty_body_targeter;
pub mod error;
pub mod exit_code;
pub mod interrupt;
pub mod journal;
pub mod logging;
pub mod model;
pub mod mutator;
pub mod orchestrator;
pub mod patch;
pub mod path;
pub mod repository;
pub mod status;
pub mod strategy;
pub mod target;
pub mod test_function_map;
pub mod test_log;
pub mod textedit;
pub mod source_transform;

/// This crate's version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The common result type used throughout the crate.
pub type Result<T> = anyhow::Result<T>;
