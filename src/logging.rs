// Copyright 2025 Martin Pool

//! Logging setup: a `tracing-subscriber` `EnvFilter` layer on stderr, plus
//! an optional rolling file appender under the run directory so a failed
//! run's full trace survives after the terminal scrolls away.
//!
//! Grounded on `examples/NomicFoundation-edr/crates/edr_napi/src/context.rs`'s
//! `EnvFilter` + `Registry` layering, the idiomatic way the pack wires up
//! `tracing_subscriber` rather than a bespoke formatter.

use anyhow::{Context, Result};
use camino::Utf8Path;
use tracing_subscriber::{prelude::*, EnvFilter};

/// A held guard that must stay alive for the lifetime of the process for
/// the non-blocking file appender to keep flushing.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install a global subscriber: `RUST_LOG` (default `info`) controls
/// verbosity on stderr, and if `file_dir` is given a second, always-`debug`
/// layer writes `swemutate.log` there.
pub fn init(file_dir: Option<&Utf8Path>) -> Result<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_filter(env_filter);

    let (file_layer, file_guard) = match file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("create log directory {dir}"))?;
            let appender = tracing_appender::rolling::never(dir.as_std_path(), "swemutate.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(stderr_layer).with(file_layer).init();
    Ok(LoggingGuard { _file_guard: file_guard })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn init_without_a_file_dir_does_not_error() {
        // Installing a second global subscriber in the same process would
        // panic, so this only constructs the filter/layer plumbing without
        // calling `init()` on the registry.
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_filter(env_filter);
    }
}
