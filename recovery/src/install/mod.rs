// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    error::Error as _,
    ffi::OsStr,
    fmt::Write as _,
    fs::{self, OpenOptions},
    io,
    os::unix::{ffi::OsStrExt, fs::OpenOptionsExt},
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::atomic::AtomicBool,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    crypto,
    format::zip::{self, Archive, ZipPackage},
    install::{
        firmware::FirmwareStore,
        mount::Mounter,
        props::{LegacyProperties, PropertyWorkspace},
        record::LastInstall,
        ui::{BackgroundIcon, Ui},
        verify::Verifier,
    },
};

pub mod classify;
pub mod firmware;
pub mod mount;
pub mod props;
pub mod protocol;
pub mod record;
pub mod ui;
pub mod verify;

pub const UPDATE_BINARY_ENTRY: &str = "META-INF/com/google/android/update-binary";
pub const UPDATE_SCRIPT_ENTRY: &str = "META-INF/com/google/android/update-script";

const UPDATE_SCRIPT_NOTICE: &[&str] = &[
    "Amend scripting (update-script) is no longer supported.\n",
    "Amend scripting was deprecated by Google in Android 1.5.\n",
    "It was necessary to remove it when upgrading to the ClockworkMod 3.0 Gingerbread based recovery.\n",
    "Please switch to Edify scripting (updater-script and update-binary) to create working update zip packages.\n",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstallResult {
    Success,
    Error,
    CorruptPackage,
    UpdateBinaryMissing,
    RetryOnReboot,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Can't mount {0:?}")]
    Mount(PathBuf, #[source] io::Error),
    #[error("Failed to load keys: {0:?}")]
    KeyLoad(PathBuf, #[source] crypto::Error),
    #[error("Untrusted package was not accepted")]
    Untrusted(#[source] verify::Error),
    #[error("Can't open package")]
    Archive(#[source] zip::Error),
    #[error("Package uses the unsupported update-script format")]
    LegacyScript,
    #[error("Package does not contain an update binary")]
    MissingUpdateBinary,
    #[error("Can't make {0:?}")]
    CreateBinary(PathBuf, #[source] io::Error),
    #[error("Can't copy update binary")]
    Extract(#[source] zip::Error),
    #[error("Can't find {0:?} for validation")]
    Classify(PathBuf, #[source] io::Error),
    #[error("Failed to run update binary")]
    Protocol(#[from] protocol::Error),
    #[error("Error in {0:?} ({1})")]
    InstallerFailed(PathBuf, ExitStatus),
    #[error("Failed to apply firmware update")]
    Firmware(#[from] firmware::Error),
}

impl Error {
    /// Outcome reported to the caller for this failure.
    pub fn result(&self) -> InstallResult {
        match self {
            Self::Mount(..) | Self::KeyLoad(..) | Self::Untrusted(_) | Self::Archive(_) => {
                InstallResult::CorruptPackage
            }
            Self::LegacyScript | Self::MissingUpdateBinary => InstallResult::UpdateBinaryMissing,
            Self::CreateBinary(..)
            | Self::Extract(_)
            | Self::Classify(..)
            | Self::Protocol(_)
            | Self::InstallerFailed(..)
            | Self::Firmware(_) => InstallResult::Error,
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Format an error and all of its sources on one line.
fn error_chain(e: &Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();

    while let Some(s) = source {
        let _ = write!(msg, ": {s}");
        source = s.source();
    }

    msg
}

/// If the first component of `path` is a symlink to an absolute path, replace
/// it with the link target. This lets packages be found through legacy paths
/// like `/sdcard`.
pub fn resolve_path(path: &Path) -> PathBuf {
    resolve_path_with(path, |p| fs::read_link(p))
}

pub fn resolve_path_with(
    path: &Path,
    read_link: impl FnOnce(&Path) -> io::Result<PathBuf>,
) -> PathBuf {
    let bytes = path.as_os_str().as_bytes();
    if bytes.len() <= 1 {
        return path.to_owned();
    }

    let Some(split) = bytes[1..].iter().position(|b| *b == b'/').map(|i| i + 1) else {
        return path.to_owned();
    };

    let root = Path::new(OsStr::from_bytes(&bytes[..split]));
    let rest = OsStr::from_bytes(&bytes[split..]);

    match read_link(root) {
        Ok(target) if target.is_absolute() => {
            let mut resolved = target.into_os_string();
            resolved.push(rest);
            PathBuf::from(resolved)
        }
        Ok(target) => {
            debug!("Ignoring relative symlink: {root:?} -> {target:?}");
            path.to_owned()
        }
        Err(_) => path.to_owned(),
    }
}

/// External services used during an install.
pub struct Collaborators<'a> {
    pub ui: &'a mut dyn Ui,
    pub mounter: &'a dyn Mounter,
    pub verifier: &'a dyn Verifier,
    pub firmware: &'a mut dyn FirmwareStore,
}

/// Installs update packages. This owns the legacy property environment, so
/// only one install can run at a time per instance.
pub struct Installer {
    config: Config,
    legacy_props: LegacyProperties,
}

impl Installer {
    pub fn new(config: Config, workspace: Box<dyn PropertyWorkspace>) -> Self {
        let legacy_props = LegacyProperties::new(&config.legacy_props, workspace);

        Self {
            config,
            legacy_props,
        }
    }

    pub fn legacy_props(&self) -> &LegacyProperties {
        &self.legacy_props
    }

    /// Install a package and record the attempt.
    pub fn install(
        &mut self,
        path: &Path,
        cx: &mut Collaborators,
        cancel_signal: &AtomicBool,
    ) -> InstallResult {
        let record = LastInstall::begin(&self.config.last_install, path);

        let result = match self.install_package(path, cx, cancel_signal) {
            Ok(()) => InstallResult::Success,
            Err(e) => {
                let msg = error_chain(&e);
                error!("{msg}");
                cx.ui.print(&format!("E:{msg}\n"));
                e.result()
            }
        };

        if let Some(record) = record {
            record.finish(result == InstallResult::Success);
        }

        cx.ui.set_background(if result == InstallResult::Success {
            BackgroundIcon::None
        } else {
            BackgroundIcon::Error
        });

        result
    }

    /// Install a package received from a host. The received file is always
    /// deleted afterwards.
    pub fn install_sideloaded(
        &mut self,
        path: &Path,
        cx: &mut Collaborators,
        cancel_signal: &AtomicBool,
    ) -> InstallResult {
        if let Err(e) = fs::metadata(path) {
            if e.kind() == io::ErrorKind::NotFound {
                cx.ui.print("No package received.\n");
            } else {
                cx.ui.print(&format!("Error reading package:\n  {e}\n"));
            }
            cx.ui.set_background(BackgroundIcon::Error);
            return InstallResult::Error;
        }

        let result = self.install(path, cx, cancel_signal);

        cx.ui.reset_progress();
        if result == InstallResult::Success {
            cx.ui.set_background(BackgroundIcon::None);
        } else {
            cx.ui.set_background(BackgroundIcon::Error);
            cx.ui.print("Installation aborted.\n");
        }

        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove sideloaded package: {path:?}: {e}");
        }

        result
    }

    fn install_package(
        &mut self,
        path: &Path,
        cx: &mut Collaborators,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        cx.ui.set_background(BackgroundIcon::Installing);
        cx.ui.print("Finding update package...\n");
        cx.ui.show_indeterminate_progress();

        let path = resolve_path(path);
        info!("Update location: {path:?}");

        cx.mounter
            .ensure_path_mounted(&path)
            .map_err(|e| Error::Mount(path.clone(), e))?;

        cx.ui.print("Opening update package...\n");

        if self.config.signature_check {
            self.verify_package(&path, cx, cancel_signal)?;
        }

        let mut package = ZipPackage::open(&path).map_err(Error::Archive)?;

        cx.ui.print("Installing update...\n");

        self.try_update_binary(&path, &mut package, cx, cancel_signal)
    }

    fn verify_package(
        &self,
        path: &Path,
        cx: &mut Collaborators,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        let keys_file = &self.config.keys_file;
        let keys = cx
            .verifier
            .load_keys(keys_file)
            .map_err(|e| Error::KeyLoad(keys_file.clone(), e))?;
        info!("{} key(s) loaded from {keys_file:?}", keys.len());

        cx.ui.print("Verifying update package...\n");
        cx.ui.show_progress(
            self.config.progress.verification_fraction,
            self.config.progress.verification_seconds,
        );

        match cx.verifier.verify(path, &keys, cancel_signal) {
            Ok(()) => {
                info!("Signature verified");
                Ok(())
            }
            Err(e) => {
                error!("Signature verification failed: {e}");
                cx.ui.print(&format!("Signature verification failed:\n  {e}\n"));

                if cx
                    .ui
                    .confirm("Install Untrusted Package?", "Yes - Install untrusted zip")
                {
                    warn!("Installing untrusted package: {path:?}");
                    Ok(())
                } else {
                    Err(Error::Untrusted(e))
                }
            }
        }
    }

    fn try_update_binary(
        &mut self,
        path: &Path,
        package: &mut dyn Archive,
        cx: &mut Collaborators,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        if !package.contains(UPDATE_BINARY_ENTRY).map_err(Error::Archive)? {
            if package.contains(UPDATE_SCRIPT_ENTRY).map_err(Error::Archive)? {
                for line in UPDATE_SCRIPT_NOTICE {
                    cx.ui.print(line);
                }
                return Err(Error::LegacyScript);
            }

            return Err(Error::MissingUpdateBinary);
        }

        let binary = &self.config.update_binary;
        extract_update_binary(package, binary, cancel_signal)?;

        let classification =
            classify::classify_file(binary).map_err(|e| Error::Classify(binary.clone(), e))?;
        debug!("Update binary markers: {classification:?}");

        let guard = if classification.needs_legacy_props() {
            info!("Using legacy property environment for update-binary...");

            match self.legacy_props.engage() {
                Ok(g) => {
                    info!("Legacy property environment initialized.");
                    Some(g)
                }
                Err(e) => {
                    error!(
                        "Legacy property environment did not init successfully. \
                        Properties may not be detected: {e}"
                    );
                    None
                }
            }
        } else {
            None
        };

        let env = guard
            .as_ref()
            .map(|g| {
                let (key, value) = g.env();
                (key, value.to_owned())
            })
            .into_iter()
            .collect::<Vec<_>>();
        let env_refs = env.iter().map(|(k, v)| (*k, v.as_str())).collect::<Vec<_>>();

        let outcome = protocol::run_update_binary(
            binary,
            path,
            &env_refs,
            cx.ui,
            self.config.progress.verification_fraction,
        );

        // Restore the live property area before anything else can fail.
        if let Some(guard) = guard {
            match guard.release() {
                Ok(()) => info!("Legacy property environment disabled."),
                Err(e) => error!(
                    "Legacy property environment did not disable successfully. \
                    Legacy properties may still be in use: {e}"
                ),
            }
        }

        let outcome = outcome?;

        if !outcome.status.success() {
            if let Some(request) = outcome.firmware {
                debug!("Discarding firmware request: {request:?}");
            }
            return Err(Error::InstallerFailed(path.to_owned(), outcome.status));
        }

        if let Some(request) = outcome.firmware {
            info!(
                "Installing {} firmware from {:?}",
                request.partition_type, request.source,
            );
            firmware::apply(&request, package, cx.firmware, cancel_signal)?;
        }

        Ok(())
    }
}

/// Extract the installer to `binary`, replacing any existing file. The file is
/// closed before returning so that it can be executed.
fn extract_update_binary(
    package: &mut dyn Archive,
    binary: &Path,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    if let Err(e) = fs::remove_file(binary) {
        if e.kind() != io::ErrorKind::NotFound {
            return Err(Error::CreateBinary(binary.to_owned(), e));
        }
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o755)
        .open(binary)
        .map_err(|e| Error::CreateBinary(binary.to_owned(), e))?;

    package
        .extract_entry(UPDATE_BINARY_ENTRY, &mut file, cancel_signal)
        .map_err(Error::Extract)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{io, path::PathBuf};

    use super::*;

    #[test]
    fn resolve_absolute_symlink() {
        let resolved = resolve_path_with(Path::new("/sdcard/update.zip"), |p| {
            assert_eq!(p, Path::new("/sdcard"));
            Ok(PathBuf::from("/storage/emulated/0"))
        });
        assert_eq!(resolved, Path::new("/storage/emulated/0/update.zip"));
    }

    #[test]
    fn resolve_ignores_relative_and_missing() {
        let path = Path::new("/sdcard/dir/update.zip");

        assert_eq!(
            resolve_path_with(path, |_| Ok(PathBuf::from("storage/emulated/0"))),
            path,
        );
        assert_eq!(
            resolve_path_with(path, |_| Err(io::ErrorKind::InvalidInput.into())),
            path,
        );
    }

    #[test]
    fn resolve_single_component() {
        let called = |_: &Path| -> io::Result<PathBuf> { panic!("Unexpected readlink") };

        assert_eq!(resolve_path_with(Path::new("/"), called), Path::new("/"));
        assert_eq!(
            resolve_path_with(Path::new("/update.zip"), called),
            Path::new("/update.zip"),
        );
    }

    #[test]
    fn error_results() {
        assert_eq!(
            Error::MissingUpdateBinary.result(),
            InstallResult::UpdateBinaryMissing,
        );
        assert_eq!(
            Error::Archive(crate::format::zip::Error::EntryNotFound("x".to_owned())).result(),
            InstallResult::CorruptPackage,
        );
        assert_eq!(
            Error::CreateBinary(PathBuf::new(), io::ErrorKind::PermissionDenied.into()).result(),
            InstallResult::Error,
        );
    }
}
