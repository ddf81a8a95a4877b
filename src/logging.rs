//! Tracing setup for the binary.
//!
//! The console shows progress (INFO) and failures (ERROR) only, unless
//! `--debug` is given. Everything from DEBUG up, including WARN-level retry
//! noise, goes to `<logs>/pipeline.log`. `RUST_LOG` overrides the default
//! filter.

use crate::error::{Result, S2agError};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE: &str = "pipeline.log";

const DEFAULT_FILTER: &str = "info,rusts2ag=debug";

/// Whether an event at `level` reaches the console.
pub fn console_allows(level: &Level, debug: bool) -> bool {
    debug || *level == Level::INFO || *level == Level::ERROR
}

/// Install the global subscriber. `logs_dir` enables the file layer.
pub fn init(logs_dir: Option<&Path>, debug: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console = fmt::layer()
        .with_target(false)
        .with_filter(filter_fn(move |meta| console_allows(meta.level(), debug)));

    let file_layer = match logs_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| S2agError::Config(format!("Failed to install tracing subscriber: {}", e)))
}
