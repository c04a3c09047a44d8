// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use thiserror::Error;
use tracing::info;

use crate::format::zip::{self, Archive};

/// Filenames with this prefix refer to an entry inside the update package.
pub const PACKAGE_PREFIX: &str = "PACKAGE:";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read firmware image from package")]
    Entry(#[source] zip::Error),
    #[error("Failed to read firmware image: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Failed to store {0:?} firmware image")]
    Store(String, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FirmwareSource {
    /// Entry name inside the update package.
    Package(String),
    /// Path on the filesystem.
    File(PathBuf),
}

/// A request from the installer to hand a firmware image to the bootloader.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FirmwareUpdateRequest {
    /// Kind of firmware, such as `radio` or `hboot`.
    pub partition_type: String,
    pub source: FirmwareSource,
}

impl FirmwareUpdateRequest {
    pub fn new(partition_type: &str, filename: &str) -> Self {
        let source = match filename.strip_prefix(PACKAGE_PREFIX) {
            Some(name) => FirmwareSource::Package(name.to_owned()),
            None => FirmwareSource::File(PathBuf::from(filename)),
        };

        Self {
            partition_type: partition_type.to_owned(),
            source,
        }
    }

    /// Load the firmware image contents.
    pub fn load(&self, archive: &mut dyn Archive, cancel_signal: &AtomicBool) -> Result<Vec<u8>> {
        match &self.source {
            FirmwareSource::Package(name) => {
                archive.read_entry(name, cancel_signal).map_err(Error::Entry)
            }
            FirmwareSource::File(path) => fs::read(path).map_err(|e| Error::Read(path.clone(), e)),
        }
    }
}

/// Sink for firmware that should be flashed by the bootloader on the next
/// boot.
pub trait FirmwareStore {
    fn remember(&mut self, partition_type: &str, data: &[u8]) -> io::Result<()>;
}

/// Stages firmware images as files in a directory, one per partition type.
#[derive(Clone, Debug)]
pub struct StagedFirmware {
    dir: PathBuf,
}

impl StagedFirmware {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_owned(),
        }
    }

    pub fn path_for(&self, partition_type: &str) -> PathBuf {
        self.dir.join(format!("{partition_type}.img"))
    }
}

impl FirmwareStore for StagedFirmware {
    fn remember(&mut self, partition_type: &str, data: &[u8]) -> io::Result<()> {
        if partition_type.is_empty()
            || partition_type == ".."
            || partition_type.contains(['/', '\0'])
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid firmware type: {partition_type:?}"),
            ));
        }

        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(partition_type);
        fs::write(&path, data)?;

        info!("Staged {partition_type} firmware: {path:?}");

        Ok(())
    }
}

/// Load the requested firmware and hand it to `store`.
pub fn apply(
    request: &FirmwareUpdateRequest,
    archive: &mut dyn Archive,
    store: &mut dyn FirmwareStore,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    let data = request.load(archive, cancel_signal)?;

    store
        .remember(&request.partition_type, &data)
        .map_err(|e| Error::Store(request.partition_type.clone(), e))
}
