// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Portion of the progress bar consumed by signature verification.
pub const VERIFICATION_PROGRESS_FRACTION: f32 = 0.25;
/// Expected duration of signature verification in seconds.
pub const VERIFICATION_PROGRESS_TIME: u32 = 60;

const BLOCK_BY_NAME: &str = "/dev/block/platform/msm_sdcc.1/by-name";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Failed to parse config: {0:?}")]
    Parse(PathBuf, #[source] toml_edit::de::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProgressConfig {
    pub verification_fraction: f32,
    pub verification_seconds: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            verification_fraction: VERIFICATION_PROGRESS_FRACTION,
            verification_seconds: VERIFICATION_PROGRESS_TIME,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LegacyPropsConfig {
    /// Property area used by current installers.
    pub live_path: PathBuf,
    /// Where the live property area is moved while a legacy installer runs.
    pub backup_path: PathBuf,
    /// Size of the legacy property workspace in bytes.
    pub workspace_size: u32,
    /// `build.prop`-style files copied into the workspace. Later files
    /// override earlier ones.
    pub prop_files: Vec<PathBuf>,
}

impl Default for LegacyPropsConfig {
    fn default() -> Self {
        Self {
            live_path: PathBuf::from("/dev/__properties__"),
            backup_path: PathBuf::from("/dev/__properties_backup__"),
            workspace_size: 32768,
            prop_files: vec![PathBuf::from("/default.prop")],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LokiConfig {
    pub aboot: PathBuf,
    pub boot: PathBuf,
    pub recovery: PathBuf,
}

impl Default for LokiConfig {
    fn default() -> Self {
        Self {
            aboot: Path::new(BLOCK_BY_NAME).join("aboot"),
            boot: Path::new(BLOCK_BY_NAME).join("boot"),
            recovery: Path::new(BLOCK_BY_NAME).join("recovery"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Whether packages must pass signature verification (or be explicitly
    /// accepted by the user).
    pub signature_check: bool,
    pub keys_file: PathBuf,
    /// Where the package's installer is extracted before execution.
    pub update_binary: PathBuf,
    pub last_install: PathBuf,
    /// Where firmware requested by an installer is staged for the
    /// bootloader.
    pub firmware_dir: PathBuf,
    pub progress: ProgressConfig,
    pub legacy_props: LegacyPropsConfig,
    pub loki: LokiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signature_check: true,
            keys_file: PathBuf::from("/res/keys"),
            update_binary: PathBuf::from("/tmp/update_binary"),
            last_install: PathBuf::from("/cache/recovery/last_install"),
            firmware_dir: PathBuf::from("/cache/recovery/firmware"),
            progress: ProgressConfig::default(),
            legacy_props: LegacyPropsConfig::default(),
            loki: LokiConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml(path: &Path, contents: &str) -> Result<Self> {
        toml_edit::de::from_str(contents).map_err(|e| Error::Parse(path.to_owned(), e))
    }
}

/// Load the config from a TOML file. Missing keys take their default values.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path).map_err(|e| Error::Read(path.to_owned(), e))?;

    Config::from_toml(path, &contents)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn partial_config() {
        let config = Config::from_toml(
            Path::new("test.toml"),
            r#"
                signature_check = false

                [legacy_props]
                backup_path = "/tmp/props_backup"
                prop_files = ["/default.prop", "/system/build.prop"]

                [loki]
                boot = "/dev/block/boot"
            "#,
        )
        .unwrap();

        assert!(!config.signature_check);
        assert_eq!(config.keys_file, PathBuf::from("/res/keys"));
        assert_eq!(config.legacy_props.live_path, PathBuf::from("/dev/__properties__"));
        assert_eq!(config.legacy_props.backup_path, PathBuf::from("/tmp/props_backup"));
        assert_eq!(
            config.legacy_props.prop_files,
            [Path::new("/default.prop"), Path::new("/system/build.prop")],
        );
        assert_eq!(config.loki.boot, PathBuf::from("/dev/block/boot"));
        assert_eq!(
            config.loki.aboot,
            PathBuf::from("/dev/block/platform/msm_sdcc.1/by-name/aboot"),
        );
        assert_eq!(config.progress, ProgressConfig::default());
    }

    #[test]
    fn unknown_key() {
        assert_matches!(
            Config::from_toml(Path::new("test.toml"), "signature_checks = true"),
            Err(Error::Parse(_, _))
        );
    }
}
