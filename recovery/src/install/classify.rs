// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Heuristic detection of installers that were built against the pre-4.4
//! property namespace.
//!
//! Stock edify updaters contain `set_perm_` helpers. Updaters built for 4.4 and
//! newer also contain `set_metadata_`. An updater with the former but not the
//! latter expects the legacy property environment.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

const SET_PERM: &[u8] = b"set_perm_";
const SET_METADATA: &[u8] = b"set_metadata_";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Classification {
    pub found_set_perm: bool,
    pub found_set_metadata: bool,
}

impl Classification {
    /// Whether the installer must run with the legacy property environment.
    pub fn needs_legacy_props(&self) -> bool {
        self.found_set_perm && !self.found_set_metadata
    }
}

/// Single-pass matcher for both markers.
///
/// Both markers share one cursor. A byte that doesn't extend the current
/// partial match resets the cursor and is consumed without being compared
/// against the start of either marker. Existing installers are classified
/// against exactly this behavior, so it must not be turned into a proper
/// substring search.
#[derive(Clone, Debug, Default)]
pub struct Scanner {
    pos: usize,
    result: Classification,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        for &b in data {
            self.step(b);
        }
    }

    fn step(&mut self, b: u8) {
        if !self.result.found_set_perm && SET_PERM.get(self.pos) == Some(&b) {
            self.pos += 1;
            if self.pos == SET_PERM.len() {
                self.result.found_set_perm = true;
                self.pos = 0;
            }
            return;
        }

        if !self.result.found_set_metadata && SET_METADATA.get(self.pos) == Some(&b) {
            self.pos += 1;
            if self.pos == SET_METADATA.len() {
                self.result.found_set_metadata = true;
                self.pos = 0;
            }
            return;
        }

        self.pos = 0;
    }

    pub fn finish(self) -> Classification {
        self.result
    }
}

pub fn classify_bytes(data: &[u8]) -> Classification {
    let mut scanner = Scanner::new();
    scanner.feed(data);
    scanner.finish()
}

pub fn classify_reader(mut reader: impl Read) -> io::Result<Classification> {
    let mut scanner = Scanner::new();
    let mut buf = [0u8; 16384];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        scanner.feed(&buf[..n]);
    }

    Ok(scanner.finish())
}

pub fn classify_file(path: &Path) -> io::Result<Classification> {
    let file = File::open(path)?;

    classify_reader(BufReader::new(file))
}
