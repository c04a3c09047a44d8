// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::{self, File, Permissions},
    io::{self, Write},
    os::unix::{ffi::OsStrExt, fs::PermissionsExt},
    path::{Path, PathBuf},
};

use tracing::warn;

/// Record of the most recent install attempt. The package path is written
/// before the installer runs so that an interrupted install still leaves a
/// trace. The outcome line is appended afterwards.
pub struct LastInstall {
    path: PathBuf,
    file: File,
}

impl LastInstall {
    fn create(path: &Path, package: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::create(path)?;
        file.write_all(package.as_os_str().as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Self {
            path: path.to_owned(),
            file,
        })
    }

    /// Start a record. Failures are not fatal to the install.
    pub fn begin(path: &Path, package: &Path) -> Option<Self> {
        match Self::create(path, package) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("Failed to open last install record: {path:?}: {e}");
                None
            }
        }
    }

    fn write_outcome(&mut self, success: bool) -> io::Result<()> {
        self.file.write_all(if success { b"1\n" } else { b"0\n" })?;
        self.file.flush()?;
        fs::set_permissions(&self.path, Permissions::from_mode(0o644))
    }

    pub fn finish(mut self, success: bool) {
        if let Err(e) = self.write_outcome(success) {
            warn!("Failed to write last install record: {:?}: {e}", self.path);
        }
    }
}
