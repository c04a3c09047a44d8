/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Since this crate is primarily an application and not a library, the semver
//! versioning covers the CLI only. All Rust APIs can change at any time, even
//! in patch releases.
//!
//! The CLI source files use concrete types wherever possible for simplicity,
//! while the "library"-style source files are written against the
//! collaborator traits in [`install`].

pub mod cli;
pub mod config;
pub mod crypto;
pub mod format;
pub mod install;
pub mod patch;
pub mod stream;
pub mod util;
