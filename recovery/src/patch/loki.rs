// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Validation and flashing of prebuilt Loki images.
//!
//! Nothing is patched here. The image already contains the exploit payload.
//! This only checks that the device's aboot is one that the payload was built
//! for before the image is written to the raw partition.

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::LokiConfig,
    format::loki::{self, ABOOT_WINDOW, LokiImage, PatchCandidate},
    util::NumBytes,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PartitionRole {
    Boot,
    Recovery,
}

impl PartitionRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::Recovery => "recovery",
        }
    }
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "boot" => Ok(Self::Boot),
            "recovery" => Ok(Self::Recovery),
            _ => Err(Error::Usage(s.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("First argument must be \"boot\" or \"recovery\", not {0:?}")]
    Usage(String),
    #[error("Failed to read Loki image: {0:?}")]
    ImageRead(PathBuf, #[source] io::Error),
    #[error("Failed to read aboot: {0:?}")]
    AbootRead(PathBuf, #[source] io::Error),
    #[error("Invalid Loki image: {0:?}")]
    InvalidImage(PathBuf, #[source] loki::Error),
    #[error("Loki image is not a {expected} image: {path:?}")]
    RoleMismatch {
        path: PathBuf,
        expected: PartitionRole,
    },
    #[error("Loki aboot version does not match device")]
    DeviceMismatch(#[source] loki::Error),
    #[error("Failed to write to block device: {0:?}")]
    Flash(PathBuf, #[source] io::Error),
}

impl Error {
    /// Whether the target partition is known to be untouched and a different
    /// image might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidImage(..) | Self::RoleMismatch { .. } | Self::DeviceMismatch(_)
        )
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Device nodes used when flashing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LokiTargets {
    pub aboot: PathBuf,
    pub boot: PathBuf,
    pub recovery: PathBuf,
}

impl LokiTargets {
    pub fn device(&self, role: PartitionRole) -> &Path {
        match role {
            PartitionRole::Boot => &self.boot,
            PartitionRole::Recovery => &self.recovery,
        }
    }
}

impl From<&LokiConfig> for LokiTargets {
    fn from(config: &LokiConfig) -> Self {
        Self {
            aboot: config.aboot.clone(),
            boot: config.boot.clone(),
            recovery: config.recovery.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlashReport {
    pub device: PathBuf,
    pub candidate: PatchCandidate,
    pub size: usize,
}

/// Check `image` against the role it is meant for and against the device's
/// aboot. The validated image bytes and the aboot match are returned.
pub fn validate(
    role: PartitionRole,
    image: &Path,
    targets: &LokiTargets,
) -> Result<(Vec<u8>, PatchCandidate)> {
    let data = fs::read(image).map_err(|e| Error::ImageRead(image.to_owned(), e))?;

    let parsed =
        LokiImage::parse(&data).map_err(|e| Error::InvalidImage(image.to_owned(), e))?;
    debug!("Loki header: {:?}", parsed.loki);

    if parsed.loki.recovery_flag() != u32::from(role == PartitionRole::Recovery) {
        return Err(Error::RoleMismatch {
            path: image.to_owned(),
            expected: role,
        });
    }

    let ramdisk_addr = parsed.boot.ramdisk_addr();

    let mut aboot = Vec::with_capacity(ABOOT_WINDOW);
    File::open(&targets.aboot)
        .and_then(|f| f.take(ABOOT_WINDOW as u64).read_to_end(&mut aboot))
        .map_err(|e| Error::AbootRead(targets.aboot.clone(), e))?;

    let candidate = loki::find_patch_site(ramdisk_addr, &aboot).map_err(|e| match e {
        loki::Error::NoPatternMatch => Error::DeviceMismatch(e),
        e => Error::InvalidImage(image.to_owned(), e),
    })?;

    Ok((data, candidate))
}

/// Validate a Loki image and write it to the partition for `role`. The device
/// node is only opened after validation succeeds. A failed write leaves the
/// partition in an unknown state.
pub fn flash(role: PartitionRole, image: &Path, targets: &LokiTargets) -> Result<FlashReport> {
    let (data, candidate) = validate(role, image, targets)?;

    info!("Loki validation passed, flashing image.");

    let device = targets.device(role);

    let mut file = OpenOptions::new()
        .write(true)
        .open(device)
        .map_err(|e| Error::Flash(device.to_owned(), e))?;

    file.write_all(&data)
        .and_then(|()| file.flush())
        .and_then(|()| file.sync_all())
        .map_err(|e| Error::Flash(device.to_owned(), e))?;

    info!("Wrote {:?} to {device:?}", NumBytes(data.len()));

    Ok(FlashReport {
        device: device.to_owned(),
        candidate,
        size: data.len(),
    })
}
