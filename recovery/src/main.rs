// SPDX-FileCopyrightText: 2023-2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::error;

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

fn main() -> ExitCode {
    // Archive extraction and signature hashing poll this between chunks.
    let cancel_signal = Arc::new(AtomicBool::new(false));
    let signal = cancel_signal.clone();

    if let Err(e) = ctrlc::set_handler(move || signal.store(true, Ordering::SeqCst)) {
        eprintln!("Failed to set signal handler: {e}");
        return ExitCode::FAILURE;
    }

    let Err(e) = recovery::cli::args::main(&LOGGING_INITIALIZED, &cancel_signal) else {
        return ExitCode::SUCCESS;
    };

    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        error!("{e:?}");
    } else {
        eprintln!("{e:?}");
    }

    ExitCode::FAILURE
}
