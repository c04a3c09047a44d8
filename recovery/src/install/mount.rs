// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{io, path::Path};

use tracing::debug;

/// Makes the volume holding a path available.
pub trait Mounter {
    fn ensure_path_mounted(&self, path: &Path) -> io::Result<()>;
}

/// For environments where every volume is already mounted. The package's
/// parent directory must exist.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExistingMounts;

impl Mounter for ExistingMounts {
    fn ensure_path_mounted(&self, path: &Path) -> io::Result<()> {
        let parent = crate::util::parent_path(path);

        if !parent.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Volume is not available: {parent:?}"),
            ));
        }

        debug!("Volume already available: {parent:?}");

        Ok(())
    }
}
