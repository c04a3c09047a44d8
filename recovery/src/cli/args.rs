// SPDX-FileCopyrightText: 2023-2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{Level, debug};

use crate::{
    cli::{completion, install, loki, package},
    config::{self, Config},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Level and message only.
    #[default]
    Short,
    /// Include timestamps and the source module.
    Long,
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Subcommand)]
pub enum Command {
    Install(install::InstallCli),
    SideloadInstall(install::SideloadInstallCli),
    LokiFlash(loki::LokiFlashCli),
    Classify(package::ClassifyCli),
    Verify(package::VerifyCli),
    Completion(completion::CompletionCli),
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to TOML config file.
    ///
    /// Any key that is not specified takes its default value.
    #[arg(long, global = true, value_name = "FILE", value_parser)]
    pub config: Option<PathBuf>,

    /// Lowest log message severity to output.
    #[arg(long, global = true, value_name = "LEVEL", value_enum, default_value_t)]
    pub log_level: LogLevel,

    /// Output format for log messages.
    #[arg(long, global = true, value_name = "FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => config::load_config(path)
                .with_context(|| format!("Failed to load config: {path:?}")),
            None => Ok(Config::default()),
        }
    }
}

pub fn init_logging(log_level: LogLevel, log_format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(log_level.as_level());

    match log_format {
        LogFormat::Short => builder.without_time().with_target(false).init(),
        LogFormat::Long => builder.init(),
    }
}

pub fn main(logging_initialized: &AtomicBool, cancel_signal: &Arc<AtomicBool>) -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_level, cli.log_format);
    logging_initialized.store(true, Ordering::SeqCst);

    let config = cli.load_config()?;
    debug!("Loaded config: {config:?}");

    match cli.command {
        Command::Install(c) => install::install_main(&c, config, cancel_signal),
        Command::SideloadInstall(c) => install::sideload_install_main(&c, config, cancel_signal),
        Command::LokiFlash(c) => loki::loki_flash_main(&c, &config),
        Command::Classify(c) => package::classify_main(&c, cancel_signal),
        Command::Verify(c) => package::verify_main(&c, &config, cancel_signal),
        Command::Completion(c) => completion::completion_main(&c),
    }
}
