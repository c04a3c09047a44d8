// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{path::PathBuf, sync::atomic::AtomicBool};

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::{
    cli::{status, warning},
    config::Config,
    format::zip::{Archive, ZipPackage},
    install::{
        UPDATE_BINARY_ENTRY, classify,
        verify::{SignatureVerifier, Verifier},
    },
};

pub fn classify_main(cli: &ClassifyCli, cancel_signal: &AtomicBool) -> Result<()> {
    let classification = if cli.binary {
        classify::classify_file(&cli.input)
            .with_context(|| format!("Failed to read update binary: {:?}", cli.input))?
    } else {
        let mut package = ZipPackage::open(&cli.input)?;
        let data = package
            .read_entry(UPDATE_BINARY_ENTRY, cancel_signal)
            .with_context(|| format!("Failed to read update binary from: {:?}", cli.input))?;

        classify::classify_bytes(&data)
    };

    status!("Found set_perm_: {}", classification.found_set_perm);
    status!("Found set_metadata_: {}", classification.found_set_metadata);

    if classification.needs_legacy_props() {
        warning!("Update binary requires the legacy property environment");
    } else {
        status!("Update binary uses the current property environment");
    }

    Ok(())
}

pub fn verify_main(cli: &VerifyCli, config: &Config, cancel_signal: &AtomicBool) -> Result<()> {
    let keys_file = cli.keys.as_ref().unwrap_or(&config.keys_file);
    let verifier = SignatureVerifier;

    let keys = verifier
        .load_keys(keys_file)
        .with_context(|| format!("Failed to load keys: {keys_file:?}"))?;
    if keys.is_empty() {
        bail!("No keys found in: {keys_file:?}");
    }

    status!("Loaded {} key(s) from {keys_file:?}", keys.len());

    verifier
        .verify(&cli.package, &keys, cancel_signal)
        .with_context(|| format!("Failed to verify package: {:?}", cli.package))?;

    status!("Signature is valid");

    Ok(())
}

/// Check whether an update binary needs the legacy property environment.
#[derive(Debug, Parser)]
pub struct ClassifyCli {
    /// Path to update package.
    #[arg(value_name = "FILE", value_parser)]
    pub input: PathBuf,

    /// Treat the input as an extracted update binary instead of a package.
    #[arg(long)]
    pub binary: bool,
}

/// Verify an update package's whole-file signature.
#[derive(Debug, Parser)]
pub struct VerifyCli {
    /// Path to update package.
    #[arg(value_name = "FILE", value_parser)]
    pub package: PathBuf,

    /// Path to PEM certificates to trust.
    ///
    /// This overrides the `keys_file` config option.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub keys: Option<PathBuf>,
}
