// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Temporary legacy property environment for old installers.
//!
//! Installers built before 4.4 look for the property area through the
//! `ANDROID_PROPERTY_WORKSPACE` environment variable and only fall back to it
//! when the modern property area path doesn't exist. While a legacy installer
//! runs, the live property area is moved aside and a workspace descriptor is
//! published to the child.

use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File},
    io::{self, Write},
    os::fd::{AsRawFd, OwnedFd},
    path::{Path, PathBuf},
};

use rustix::fs::{CWD, MemfdFlags, RenameFlags};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{config::LegacyPropsConfig, format::proparea::PropertyArea};

pub const WORKSPACE_ENV: &str = "ANDROID_PROPERTY_WORKSPACE";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Legacy property environment is already engaged")]
    AlreadyEngaged,
    #[error("Failed to create legacy property workspace")]
    Workspace(#[source] io::Error),
    #[error("Failed to rename property area: {0:?} -> {1:?}")]
    Rename(PathBuf, PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// System properties visible to installers.
pub trait PropertyStore {
    fn get(&self, name: &str) -> Option<String>;

    fn set(&mut self, name: &str, value: &str) -> io::Result<()>;

    /// Names of every property, in the order they should be published.
    fn names(&self) -> Vec<String>;
}

/// In-memory property store, usually filled from `build.prop`-style files.
#[derive(Clone, Debug, Default)]
pub struct PropertyMap {
    props: BTreeMap<String, String>,
}

impl PropertyStore for PropertyMap {
    fn get(&self, name: &str) -> Option<String> {
        self.props.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: &str) -> io::Result<()> {
        self.props.insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    fn names(&self) -> Vec<String> {
        self.props.keys().cloned().collect()
    }
}

/// Load `name=value` lines into `store`. Blank lines and `#` comments are
/// skipped and later definitions override earlier ones.
pub fn load_prop_file(store: &mut dyn PropertyStore, path: &Path) -> io::Result<()> {
    let data = fs::read_to_string(path)?;

    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((name, value)) = line.split_once('=') else {
            debug!("Ignoring malformed line in {path:?}: {line:?}");
            continue;
        };

        store.set(name.trim(), value.trim())?;
    }

    Ok(())
}

/// Load every file that exists. Missing files are expected since the set of
/// property files differs between devices.
pub fn load_prop_files(store: &mut dyn PropertyStore, paths: &[PathBuf]) {
    for path in paths {
        match load_prop_file(store, path) {
            Ok(()) => debug!("Loaded properties from {path:?}"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Property file does not exist: {path:?}");
            }
            Err(e) => warn!("Failed to load properties from {path:?}: {e}"),
        }
    }
}

/// Publishes the shared memory region that legacy installers read properties
/// from.
pub trait PropertyWorkspace {
    /// Allocate and fill a workspace of `size` bytes. The returned descriptor
    /// may be close-on-exec. An inheritable duplicate is made before it is
    /// published.
    fn create(&mut self, size: u32) -> io::Result<OwnedFd>;
}

/// Anonymous memory-backed workspace holding a snapshot of a property store.
pub struct MemfdWorkspace<S> {
    store: S,
}

impl<S: PropertyStore> MemfdWorkspace<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn build_area(&self, size: u32) -> io::Result<PropertyArea> {
        let mut area = PropertyArea::new(size as usize)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        for name in self.store.names() {
            let Some(value) = self.store.get(&name) else {
                continue;
            };

            if let Err(e) = area.set(&name, &value) {
                warn!("Property not copied to legacy workspace: {e}");
            }
        }

        debug!("Legacy property workspace has {} entries", area.len());

        Ok(area)
    }
}

impl<S: PropertyStore> PropertyWorkspace for MemfdWorkspace<S> {
    fn create(&mut self, size: u32) -> io::Result<OwnedFd> {
        let area = self.build_area(size)?;

        let fd = rustix::fs::memfd_create(c"legacy_properties", MemfdFlags::CLOEXEC)?;
        let mut file = File::from(fd);
        file.write_all(area.as_bytes())?;

        Ok(file.into())
    }
}

struct Published {
    /// Inheritable descriptor referenced by `env_value`.
    _fd: OwnedFd,
    env_value: String,
}

/// Owner of the live/backup property area swap. At most one swap is active at
/// a time and the workspace is only created the first time it is needed.
pub struct LegacyProperties {
    live_path: PathBuf,
    backup_path: PathBuf,
    size: u32,
    workspace: Box<dyn PropertyWorkspace>,
    published: Option<Published>,
    engaged: bool,
}

impl LegacyProperties {
    pub fn new(config: &LegacyPropsConfig, workspace: Box<dyn PropertyWorkspace>) -> Self {
        Self {
            live_path: config.live_path.clone(),
            backup_path: config.backup_path.clone(),
            size: config.workspace_size,
            workspace,
            published: None,
            engaged: false,
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    fn ensure_workspace(&mut self) -> Result<&Published> {
        let published = match self.published.take() {
            Some(p) => p,
            None => {
                let fd = self.workspace.create(self.size).map_err(Error::Workspace)?;
                // dup() does not carry over O_CLOEXEC, so this survives exec.
                let inheritable =
                    rustix::io::dup(&fd).map_err(|e| Error::Workspace(e.into()))?;
                let env_value = format!("{},{}", inheritable.as_raw_fd(), self.size);

                debug!("Created legacy property workspace: {env_value}");

                Published {
                    _fd: inheritable,
                    env_value,
                }
            }
        };

        Ok(self.published.insert(published))
    }

    /// Move the live property area aside and publish the legacy workspace.
    /// The returned guard restores the live property area when dropped. An
    /// existing backup is never replaced.
    pub fn engage(&mut self) -> Result<LegacyPropsGuard<'_>> {
        if self.engaged {
            return Err(Error::AlreadyEngaged);
        }

        let env_value = self.ensure_workspace()?.env_value.clone();

        rustix::fs::renameat_with(
            CWD,
            &*self.live_path,
            CWD,
            &*self.backup_path,
            RenameFlags::NOREPLACE,
        )
        .map_err(|e| {
            Error::Rename(self.live_path.clone(), self.backup_path.clone(), e.into())
        })?;

        self.engaged = true;

        Ok(LegacyPropsGuard {
            props: self,
            env: (WORKSPACE_ENV, env_value),
            armed: true,
        })
    }

    fn disengage(&mut self) -> Result<()> {
        if !self.engaged {
            return Ok(());
        }

        fs::rename(&self.backup_path, &self.live_path).map_err(|e| {
            Error::Rename(self.backup_path.clone(), self.live_path.clone(), e)
        })?;

        self.engaged = false;

        Ok(())
    }
}

/// Active legacy property environment. Dropping the guard restores the live
/// property area and only logs a failure.
pub struct LegacyPropsGuard<'a> {
    props: &'a mut LegacyProperties,
    env: (&'static str, String),
    armed: bool,
}

impl LegacyPropsGuard<'_> {
    /// Environment variable that must be passed to the installer.
    pub fn env(&self) -> (&'static str, &str) {
        (self.env.0, &self.env.1)
    }

    /// Restore the live property area, reporting any failure to the caller.
    pub fn release(mut self) -> Result<()> {
        self.armed = false;
        self.props.disengage()
    }
}

impl fmt::Debug for LegacyPropsGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyPropsGuard")
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

impl Drop for LegacyPropsGuard<'_> {
    fn drop(&mut self) {
        if !self.armed || !self.props.engaged {
            return;
        }

        match self.props.disengage() {
            Ok(()) => info!("Legacy property environment disabled."),
            Err(e) => warn!("Legacy property environment did not disable successfully: {e}"),
        }
    }
}
