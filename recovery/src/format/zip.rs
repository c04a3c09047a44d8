// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::File,
    io::{self, BufReader, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use thiserror::Error;
use tracing::debug;
use zip::{ZipArchive, result::ZipError};

use crate::stream;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open archive: {0:?}")]
    Open(PathBuf, #[source] ZipError),
    #[error("Entry not found in archive: {0:?}")]
    EntryNotFound(String),
    #[error("Failed to open archive entry: {0:?}")]
    Entry(String, #[source] ZipError),
    #[error("Failed to extract archive entry: {0:?}")]
    Extract(String, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Named-entry access to an opened update package.
pub trait Archive {
    /// Get the uncompressed size of an entry or [`None`] if it doesn't exist.
    fn entry_size(&mut self, name: &str) -> Result<Option<u64>>;

    /// Decompress an entry into `writer`, returning the number of bytes
    /// written.
    fn extract_entry(
        &mut self,
        name: &str,
        writer: &mut dyn Write,
        cancel_signal: &AtomicBool,
    ) -> Result<u64>;

    /// Read an entry fully into memory.
    fn read_entry(&mut self, name: &str, cancel_signal: &AtomicBool) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.extract_entry(name, &mut data, cancel_signal)?;
        Ok(data)
    }

    fn contains(&mut self, name: &str) -> Result<bool> {
        Ok(self.entry_size(name)?.is_some())
    }
}

/// An update package backed by a zip file on disk. The file is closed when
/// this is dropped.
pub struct ZipPackage {
    archive: ZipArchive<BufReader<File>>,
}

impl ZipPackage {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::Open(path.to_owned(), e.into()))?;
        let archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| Error::Open(path.to_owned(), e))?;

        debug!("Opened {path:?} with {} entries", archive.len());

        Ok(Self { archive })
    }
}

impl Archive for ZipPackage {
    fn entry_size(&mut self, name: &str) -> Result<Option<u64>> {
        match self.archive.by_name(name) {
            Ok(entry) => Ok(Some(entry.size())),
            Err(ZipError::FileNotFound) => Ok(None),
            Err(e) => Err(Error::Entry(name.to_owned(), e)),
        }
    }

    fn extract_entry(
        &mut self,
        name: &str,
        writer: &mut dyn Write,
        cancel_signal: &AtomicBool,
    ) -> Result<u64> {
        let entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Err(Error::EntryNotFound(name.to_owned())),
            Err(e) => return Err(Error::Entry(name.to_owned(), e)),
        };

        stream::copy(entry, writer, cancel_signal).map_err(|e| Error::Extract(name.to_owned(), e))
    }
}
