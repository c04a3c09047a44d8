// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::{
    cli::{status, warning},
    config::Config,
    patch::loki::{self, LokiTargets, PartitionRole},
};

pub fn loki_flash_main(cli: &LokiFlashCli, config: &Config) -> Result<()> {
    let role = cli.role.parse::<PartitionRole>()?;

    let mut targets = LokiTargets::from(&config.loki);
    if let Some(path) = &cli.aboot {
        targets.aboot.clone_from(path);
    }
    if let Some(path) = &cli.device {
        match role {
            PartitionRole::Boot => targets.boot.clone_from(path),
            PartitionRole::Recovery => targets.recovery.clone_from(path),
        }
    }

    let report = match loki::flash(role, &cli.image, &targets) {
        Ok(r) => r,
        Err(e) => {
            if let loki::Error::Flash(..) = e {
                warning!("The {role} partition may be partially written");
            }
            return Err(e).with_context(|| format!("Failed to flash {:?}", cli.image));
        }
    };

    status!(
        "Matched aboot pattern #{} at {:#x} ({:?})",
        report.candidate.pattern + 1,
        report.candidate.offset,
        report.candidate.family,
    );
    status!("Loki flashing complete: {:?}", report.device);

    Ok(())
}

/// Validate a Loki image against the device's aboot and flash it.
///
/// The image is only written if its Loki header matches the partition role and
/// the aboot contains a function that the image's exploit payload targets.
#[derive(Debug, Parser)]
pub struct LokiFlashCli {
    /// Partition to flash (boot or recovery).
    #[arg(value_name = "ROLE")]
    pub role: String,

    /// Path to Loki image.
    #[arg(value_name = "FILE", value_parser)]
    pub image: PathBuf,

    /// Path to aboot partition.
    ///
    /// This overrides the `loki.aboot` config option.
    #[arg(long, value_name = "FILE", value_parser)]
    pub aboot: Option<PathBuf>,

    /// Path to the output block device.
    ///
    /// This overrides the `loki.boot` or `loki.recovery` config option.
    #[arg(long, value_name = "FILE", value_parser)]
    pub device: Option<PathBuf>,
}
