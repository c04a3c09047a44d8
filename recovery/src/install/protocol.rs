// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Line-oriented command channel between recovery and a package's installer.
//!
//! The installer is started as `<binary> <api version> <pipe fd> <package>`
//! and writes newline-terminated commands to the pipe:
//!
//! * `progress <fraction> <seconds>`: start a progress segment
//! * `set_progress <fraction>`: move within the current segment
//! * `firmware <type> <filename>`: request a firmware update after install
//! * `ui_print <text>`: show a line of text

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    os::fd::AsRawFd,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
    str::FromStr,
};

use bstr::ByteSlice;
use rustix::{io::FdFlags, pipe::PipeFlags};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::install::{firmware::FirmwareUpdateRequest, ui::Ui};

/// Protocol version passed to the installer.
pub const API_VERSION: u32 = 3;

/// Environment variable holding the package path.
pub const UPDATE_PACKAGE_ENV: &str = "UPDATE_PACKAGE";

const DELIMITERS: [char; 2] = [' ', '\n'];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to create command pipe")]
    Pipe(#[source] io::Error),
    #[error("Failed to execute installer: {0:?}")]
    Spawn(PathBuf, #[source] io::Error),
    #[error("Failed to read installer commands")]
    Read(#[source] io::Error),
    #[error("Failed to wait for installer")]
    Wait(#[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq)]
pub enum SubprocessCommand {
    Progress { fraction: f32, seconds: u32 },
    SetProgress { fraction: f32 },
    Firmware { kind: String, filename: String },
    UiPrint { text: String },
    Unknown { line: String },
}

fn parse_lenient<T: FromStr + Default>(name: &str, value: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        warn!("Invalid {name} value: {value:?}");
        T::default()
    })
}

fn parse_seconds(value: &str) -> u32 {
    if let Ok(seconds) = value.parse() {
        return seconds;
    }

    // Fractional and negative durations are truncated and clamped.
    parse_lenient::<f32>("seconds", value) as u32
}

impl SubprocessCommand {
    /// Parse a single line. Returns [`None`] for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_start_matches(DELIMITERS);
        let command_end = line.find(DELIMITERS).unwrap_or(line.len());
        let command = &line[..command_end];
        let rest = line.get(command_end + 1..).unwrap_or("");

        if command.is_empty() {
            return None;
        }

        let mut args = rest.split(DELIMITERS).filter(|a| !a.is_empty());
        let unknown = || Self::Unknown {
            line: line.trim_end_matches('\n').to_owned(),
        };

        let result = match command {
            "progress" => match (args.next(), args.next()) {
                (Some(fraction), Some(seconds)) => Self::Progress {
                    fraction: parse_lenient("fraction", fraction),
                    seconds: parse_seconds(seconds),
                },
                _ => unknown(),
            },
            "set_progress" => match args.next() {
                Some(fraction) => Self::SetProgress {
                    fraction: parse_lenient("fraction", fraction),
                },
                None => unknown(),
            },
            "firmware" => match (args.next(), args.next()) {
                (Some(kind), Some(filename)) => Self::Firmware {
                    kind: kind.to_owned(),
                    filename: filename.to_owned(),
                },
                _ => unknown(),
            },
            "ui_print" => {
                let text = rest.trim_start_matches('\n');
                let text = text.split('\n').next().unwrap_or_default();

                Self::UiPrint {
                    text: text.to_owned(),
                }
            }
            _ => unknown(),
        };

        Some(result)
    }
}

/// Iterator over the commands written to a channel. Invalid UTF-8 is replaced
/// rather than rejected.
pub struct CommandStream<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> CommandStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for CommandStream<R> {
    type Item = io::Result<SubprocessCommand>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();

            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(e)),
            }

            if let Some(command) = SubprocessCommand::parse(&self.buf.to_str_lossy()) {
                return Some(Ok(command));
            }
        }
    }
}

/// Applies commands to the UI and collects the firmware request.
pub struct CommandHandler<'a> {
    ui: &'a mut dyn Ui,
    verification_fraction: f32,
    firmware: Option<FirmwareUpdateRequest>,
}

impl<'a> CommandHandler<'a> {
    pub fn new(ui: &'a mut dyn Ui, verification_fraction: f32) -> Self {
        Self {
            ui,
            verification_fraction,
            firmware: None,
        }
    }

    pub fn handle(&mut self, command: SubprocessCommand) {
        match command {
            SubprocessCommand::Progress { fraction, seconds } => {
                // The installer's progress range excludes verification.
                let scaled = fraction * (1.0 - self.verification_fraction);
                self.ui.show_progress(scaled, seconds);
            }
            SubprocessCommand::SetProgress { fraction } => {
                self.ui.set_progress(fraction);
            }
            SubprocessCommand::Firmware { kind, filename } => {
                if self.firmware.is_some() {
                    error!("Ignoring attempt to do multiple firmware updates");
                } else {
                    self.firmware = Some(FirmwareUpdateRequest::new(&kind, &filename));
                }
            }
            SubprocessCommand::UiPrint { text } => {
                if text.is_empty() {
                    self.ui.print("\n");
                } else {
                    self.ui.print(&text);
                }
            }
            SubprocessCommand::Unknown { line } => {
                error!("Unknown command: {line:?}");
            }
        }
    }

    pub fn into_firmware(self) -> Option<FirmwareUpdateRequest> {
        self.firmware
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub status: ExitStatus,
    /// The first firmware update requested by the installer.
    pub firmware: Option<FirmwareUpdateRequest>,
}

/// Execute an installer and process its commands until it closes the channel,
/// then wait for it to exit. There is no timeout.
pub fn run_update_binary(
    binary: &Path,
    package: &Path,
    env: &[(&str, &str)],
    ui: &mut dyn Ui,
    verification_fraction: f32,
) -> Result<RunOutcome> {
    let (read_fd, write_fd) =
        rustix::pipe::pipe_with(PipeFlags::CLOEXEC).map_err(|e| Error::Pipe(e.into()))?;
    // Only the write end is inherited by the installer.
    rustix::io::fcntl_setfd(&write_fd, FdFlags::empty()).map_err(|e| Error::Pipe(e.into()))?;

    let mut command = Command::new(binary);
    command
        .arg(API_VERSION.to_string())
        .arg(write_fd.as_raw_fd().to_string())
        .arg(package)
        .env(UPDATE_PACKAGE_ENV, package);

    for (key, value) in env {
        command.env(key, value);
    }

    debug!("Executing installer: {command:?}");

    let child = command.spawn();

    // Otherwise the channel never reaches EOF.
    drop(write_fd);

    let mut child = child.map_err(|e| Error::Spawn(binary.to_owned(), e))?;

    let mut handler = CommandHandler::new(ui, verification_fraction);
    let mut read_result = Ok(());

    for command in CommandStream::new(BufReader::new(File::from(read_fd))) {
        match command {
            Ok(c) => handler.handle(c),
            Err(e) => {
                read_result = Err(e);
                break;
            }
        }
    }

    // Always reap the child, even if reading failed.
    let status = child.wait().map_err(Error::Wait)?;
    read_result.map_err(Error::Read)?;

    debug!("Installer exited with: {status}");

    Ok(RunOutcome {
        status,
        firmware: handler.into_firmware(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_commands() {
        assert_eq!(
            SubprocessCommand::parse("progress 0.5 10\n"),
            Some(SubprocessCommand::Progress {
                fraction: 0.5,
                seconds: 10,
            }),
        );
        assert_eq!(
            SubprocessCommand::parse("set_progress 0.25"),
            Some(SubprocessCommand::SetProgress { fraction: 0.25 }),
        );
        assert_eq!(
            SubprocessCommand::parse("firmware radio PACKAGE:radio.img\n"),
            Some(SubprocessCommand::Firmware {
                kind: "radio".to_owned(),
                filename: "PACKAGE:radio.img".to_owned(),
            }),
        );
    }

    #[test]
    fn parse_ui_print() {
        assert_eq!(
            SubprocessCommand::parse("ui_print  hello  world\n"),
            Some(SubprocessCommand::UiPrint {
                text: " hello  world".to_owned(),
            }),
        );
        assert_eq!(
            SubprocessCommand::parse("ui_print\n"),
            Some(SubprocessCommand::UiPrint {
                text: String::new(),
            }),
        );
        assert_eq!(
            SubprocessCommand::parse("ui_print \n"),
            Some(SubprocessCommand::UiPrint {
                text: String::new(),
            }),
        );
    }

    #[test]
    fn parse_malformed() {
        assert_eq!(SubprocessCommand::parse("\n"), None);
        assert_eq!(SubprocessCommand::parse("   "), None);
        assert_eq!(
            SubprocessCommand::parse("progress 0.5\n"),
            Some(SubprocessCommand::Unknown {
                line: "progress 0.5".to_owned(),
            }),
        );
        assert_eq!(
            SubprocessCommand::parse("progress abc 1.9\n"),
            Some(SubprocessCommand::Progress {
                fraction: 0.0,
                seconds: 1,
            }),
        );
        assert_eq!(
            SubprocessCommand::parse("reboot now"),
            Some(SubprocessCommand::Unknown {
                line: "reboot now".to_owned(),
            }),
        );
    }

    #[test]
    fn stream_skips_blank_lines() {
        let data = b"\nui_print a\n\n\xffset_progress 1\nset_progress 0.5";
        let commands = CommandStream::new(&data[..])
            .collect::<io::Result<Vec<_>>>()
            .unwrap();

        assert_eq!(
            commands,
            [
                SubprocessCommand::UiPrint {
                    text: "a".to_owned(),
                },
                SubprocessCommand::Unknown {
                    line: "\u{fffd}set_progress 1".to_owned(),
                },
                SubprocessCommand::SetProgress { fraction: 0.5 },
            ],
        );
    }
}
