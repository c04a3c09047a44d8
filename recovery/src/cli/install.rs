// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use anyhow::{Result, bail};
use clap::{Args, Parser};
use tracing::debug;

use crate::{
    cli::{status, warning},
    config::Config,
    install::{
        Collaborators, InstallResult, Installer,
        firmware::StagedFirmware,
        mount::ExistingMounts,
        props::{self, MemfdWorkspace, PropertyMap},
        ui::{BackgroundIcon, Ui},
        verify::SignatureVerifier,
    },
};

/// Terminal implementation of the install UI.
pub struct ConsoleUi {
    assume_yes: bool,
    /// Start of the current progress segment.
    segment_start: f32,
    /// Size of the current progress segment.
    segment_size: f32,
    progress: f32,
}

impl ConsoleUi {
    pub fn new(assume_yes: bool) -> Self {
        Self {
            assume_yes,
            segment_start: 0.0,
            segment_size: 0.0,
            progress: 0.0,
        }
    }

    fn report_progress(&self) {
        debug!("Progress: {:.1}%", self.progress * 100.0);
    }
}

impl Ui for ConsoleUi {
    fn print(&mut self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
    }

    fn show_progress(&mut self, fraction: f32, seconds: u32) {
        self.segment_start = self.progress;
        self.segment_size = fraction;
        debug!("Progress segment: {:.1}% over {seconds}s", fraction * 100.0);
        self.report_progress();
    }

    fn set_progress(&mut self, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.progress = self.segment_start + self.segment_size * fraction;
        self.report_progress();
    }

    fn show_indeterminate_progress(&mut self) {
        debug!("Progress: indeterminate");
    }

    fn reset_progress(&mut self) {
        self.segment_start = 0.0;
        self.segment_size = 0.0;
        self.progress = 0.0;
    }

    fn set_background(&mut self, icon: BackgroundIcon) {
        debug!("Background: {icon:?}");
    }

    fn confirm(&mut self, question: &str, yes: &str) -> bool {
        if self.assume_yes {
            warning!("{question} Answering automatically: {yes}");
            return true;
        }

        print!("{question} [{yes}] (y/N): ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) => matches!(line.trim(), "y" | "Y" | "yes" | "Yes"),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Args)]
pub struct InstallOptions {
    /// Skip signature verification.
    #[arg(long)]
    pub no_verify: bool,

    /// Accept untrusted packages without prompting.
    #[arg(short, long)]
    pub yes: bool,

    /// Directory to stage firmware updates in.
    ///
    /// This overrides the `firmware_dir` config option.
    #[arg(long, value_name = "DIR", value_parser)]
    pub firmware_dir: Option<PathBuf>,
}

impl InstallOptions {
    fn apply(&self, config: &mut Config) {
        if self.no_verify {
            config.signature_check = false;
        }
        if let Some(dir) = &self.firmware_dir {
            config.firmware_dir.clone_from(dir);
        }
    }
}

fn run(
    path: &Path,
    options: &InstallOptions,
    mut config: Config,
    sideloaded: bool,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    options.apply(&mut config);

    if !config.signature_check {
        warning!("Signature verification is disabled");
    }

    let mut ui = ConsoleUi::new(options.yes);
    let mut firmware = StagedFirmware::new(&config.firmware_dir);
    let mut store = PropertyMap::default();
    props::load_prop_files(&mut store, &config.legacy_props.prop_files);

    let mut installer = Installer::new(config, Box::new(MemfdWorkspace::new(store)));
    let mut cx = Collaborators {
        ui: &mut ui,
        mounter: &ExistingMounts,
        verifier: &SignatureVerifier,
        firmware: &mut firmware,
    };

    let result = if sideloaded {
        installer.install_sideloaded(path, &mut cx, cancel_signal)
    } else {
        installer.install(path, &mut cx, cancel_signal)
    };

    if result != InstallResult::Success {
        bail!("Installation of {path:?} failed: {result:?}");
    }

    status!("Installation complete");

    Ok(())
}

pub fn install_main(cli: &InstallCli, config: Config, cancel_signal: &AtomicBool) -> Result<()> {
    run(&cli.package, &cli.options, config, false, cancel_signal)
}

pub fn sideload_install_main(
    cli: &SideloadInstallCli,
    config: Config,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    run(&cli.package, &cli.options, config, true, cancel_signal)
}

/// Install an update package.
///
/// The package's update binary is extracted and executed. Progress and messages
/// written by the installer are shown on the terminal.
#[derive(Debug, Parser)]
pub struct InstallCli {
    /// Path to update package.
    #[arg(value_name = "FILE", value_parser)]
    pub package: PathBuf,

    #[command(flatten)]
    pub options: InstallOptions,
}

/// Install a package that was received from a host.
///
/// The package is deleted afterwards, whether or not the installation
/// succeeded.
#[derive(Debug, Parser)]
pub struct SideloadInstallCli {
    /// Path to received package.
    #[arg(value_name = "FILE", value_parser)]
    pub package: PathBuf,

    #[command(flatten)]
    pub options: InstallOptions,
}
