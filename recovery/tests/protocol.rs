// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::{self, Permissions},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Mutex,
};

use assert_matches::assert_matches;

use recovery::install::{
    firmware::{FirmwareSource, FirmwareUpdateRequest},
    protocol::{self, Error, SubprocessCommand},
    ui::{BackgroundIcon, Ui},
};

/// Executing a file while another thread has a writable descriptor to it open
/// fails with ETXTBSY, so tests that write and run scripts are serialized.
static EXEC_LOCK: Mutex<()> = Mutex::new(());

#[derive(Clone, Debug, PartialEq)]
enum Event {
    Print(String),
    ShowProgress(f32, u32),
    SetProgress(f32),
}

#[derive(Default)]
struct RecordingUi {
    events: Vec<Event>,
}

impl Ui for RecordingUi {
    fn print(&mut self, text: &str) {
        self.events.push(Event::Print(text.to_owned()));
    }

    fn show_progress(&mut self, fraction: f32, seconds: u32) {
        self.events.push(Event::ShowProgress(fraction, seconds));
    }

    fn set_progress(&mut self, fraction: f32) {
        self.events.push(Event::SetProgress(fraction));
    }

    fn show_indeterminate_progress(&mut self) {}

    fn reset_progress(&mut self) {}

    fn set_background(&mut self, _icon: BackgroundIcon) {}

    fn confirm(&mut self, _question: &str, _yes: &str) -> bool {
        false
    }
}

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("update_binary");
    fs::write(&path, format!("#!/bin/sh\nout=\"/proc/self/fd/$2\"\n{body}")).unwrap();
    fs::set_permissions(&path, Permissions::from_mode(0o755)).unwrap();
    path
}

#[test]
fn full_session() {
    let _lock = EXEC_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = tempfile::tempdir().unwrap();
    let package = temp_dir.path().join("update.zip");

    let binary = write_script(
        temp_dir.path(),
        r#"
[ "$1" = 3 ] || exit 10
[ "$UPDATE_PACKAGE" = "$3" ] || exit 11
[ "$TEST_VAR" = value ] || exit 12
echo "ui_print hello world" > "$out"
echo "progress 0.5 10" > "$out"
echo "" > "$out"
echo "set_progress 0.25" > "$out"
echo "firmware radio PACKAGE:radio.img" > "$out"
echo "firmware hboot /tmp/hboot.img" > "$out"
echo "ui_print" > "$out"
echo "reboot now" > "$out"
printf 'ui_print tail' > "$out"
exit 0
"#,
    );

    let mut ui = RecordingUi::default();
    let outcome = protocol::run_update_binary(
        &binary,
        &package,
        &[("TEST_VAR", "value")],
        &mut ui,
        0.25,
    )
    .unwrap();

    assert!(outcome.status.success(), "{:?}", outcome.status);
    assert_eq!(
        outcome.firmware,
        Some(FirmwareUpdateRequest {
            partition_type: "radio".to_owned(),
            source: FirmwareSource::Package("radio.img".to_owned()),
        }),
    );
    assert_eq!(
        ui.events,
        [
            Event::Print("hello world".to_owned()),
            Event::ShowProgress(0.375, 10),
            Event::SetProgress(0.25),
            Event::Print("\n".to_owned()),
            Event::Print("tail".to_owned()),
        ],
    );
}

#[test]
fn failed_installer() {
    let _lock = EXEC_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = tempfile::tempdir().unwrap();
    let package = temp_dir.path().join("update.zip");

    let binary = write_script(
        temp_dir.path(),
        r#"
echo "firmware radio /tmp/radio.img" > "$out"
echo "ui_print failing" > "$out"
exit 7
"#,
    );

    let mut ui = RecordingUi::default();
    let outcome = protocol::run_update_binary(&binary, &package, &[], &mut ui, 0.25).unwrap();

    assert_eq!(outcome.status.code(), Some(7));
    // The caller decides what to do with the request.
    assert!(outcome.firmware.is_some());
    assert_eq!(ui.events, [Event::Print("failing".to_owned())]);
}

#[test]
fn installer_without_output() {
    let _lock = EXEC_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = tempfile::tempdir().unwrap();

    let binary = write_script(temp_dir.path(), "exit 0\n");

    let mut ui = RecordingUi::default();
    let outcome =
        protocol::run_update_binary(&binary, Path::new("update.zip"), &[], &mut ui, 0.25)
            .unwrap();

    assert!(outcome.status.success());
    assert_eq!(outcome.firmware, None);
    assert!(ui.events.is_empty());
}

#[test]
fn missing_installer() {
    let temp_dir = tempfile::tempdir().unwrap();
    let binary = temp_dir.path().join("missing");

    let mut ui = RecordingUi::default();
    assert_matches!(
        protocol::run_update_binary(&binary, Path::new("update.zip"), &[], &mut ui, 0.25),
        Err(Error::Spawn(p, _)) if p == binary
    );
}

#[test]
fn parse_progress_scaling_inputs() {
    assert_eq!(
        SubprocessCommand::parse("progress 1 0"),
        Some(SubprocessCommand::Progress {
            fraction: 1.0,
            seconds: 0,
        }),
    );
    assert_eq!(
        SubprocessCommand::parse("  set_progress   0.75  \n"),
        Some(SubprocessCommand::SetProgress { fraction: 0.75 }),
    );
    assert_eq!(
        SubprocessCommand::parse("firmware radio\n"),
        Some(SubprocessCommand::Unknown {
            line: "firmware radio".to_owned(),
        }),
    );
}
