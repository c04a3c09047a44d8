// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Structures for Loki-tagged boot images and the aboot code patterns that the
//! Loki exploit relies on.
//!
//! A Loki image is a regular Android boot image with a secondary header at
//! [`LOKI_HEADER_OFFSET`]. The image is only usable if the device's aboot
//! contains one of the known vulnerable functions at the address implied by
//! the image's ramdisk load address.

use std::fmt;

use bstr::ByteSlice;
use thiserror::Error;
use tracing::debug;
use zerocopy::{FromBytes, little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    format::bootimage::{self, BootImageHeader},
    util,
};

pub const LOKI_MAGIC: [u8; 4] = *b"LOKI";
pub const LOKI_HEADER_OFFSET: usize = 0x400;
pub const LOKI_BUILD_SIZE: usize = 128;

/// Number of aboot bytes that are inspected.
pub const ABOOT_WINDOW: usize = 0x40000;

pub const ABOOT_BASE_G2: u32 = 0x0f7fffd8;
pub const ABOOT_BASE_SAMSUNG: u32 = 0x88dfffd8;
pub const ABOOT_BASE_LG: u32 = 0x88efffd8;

/// Length of each code pattern.
pub const PATTERN_SIZE: usize = 8;

/// Prologues of the aboot function that Loki hijacks, across known bootloader
/// builds.
pub const PATTERNS: [[u8; PATTERN_SIZE]; 6] = [
    [0xf0, 0xb5, 0x8f, 0xb0, 0x06, 0x46, 0xf0, 0xf7],
    [0xf0, 0xb5, 0x8f, 0xb0, 0x07, 0x46, 0xf0, 0xf7],
    [0x2d, 0xe9, 0xf0, 0x41, 0x86, 0xb0, 0xf1, 0xf7],
    [0x2d, 0xe9, 0xf0, 0x4f, 0xad, 0xf5, 0xc6, 0x6d],
    [0x2d, 0xe9, 0xf0, 0x4f, 0xad, 0xf5, 0x21, 0x7d],
    [0x2d, 0xe9, 0xf0, 0x4f, 0xf3, 0xb0, 0x05, 0x46],
];

/// The pattern may start at any of these offsets past the computed address.
const SCAN_OFFSETS: [u32; 4] = [0x0, 0x4, 0x8, 0xc];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not a boot image")]
    BootImage(#[from] bootimage::Error),
    #[error("Image is too small to contain a Loki header: {0} bytes")]
    TooSmall(usize),
    #[error("Input file is not a Loki image: magic is {0:?}")]
    UnknownMagic([u8; 4]),
    #[error("Patch address offset {0:#x} is outside of the aboot image")]
    OffsetOutOfBounds(i64),
    #[error("Loki aboot version does not match device")]
    NoPatternMatch,
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the Loki header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
pub struct LokiHeader {
    /// Magic value. This should be equal to [`LOKI_MAGIC`].
    pub magic: [u8; 4],
    /// 0 for boot images and 1 for recovery images.
    pub recovery: little_endian::U32,
    pub build: [u8; LOKI_BUILD_SIZE],
    pub orig_kernel_size: little_endian::U32,
    pub orig_ramdisk_size: little_endian::U32,
    pub ramdisk_addr: little_endian::U32,
}

impl LokiHeader {
    /// Raw partition flag. Loki writes exactly 0 for boot and 1 for recovery.
    pub fn recovery_flag(&self) -> u32 {
        self.recovery.get()
    }
}

impl fmt::Debug for LokiHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let build = self.build;

        f.debug_struct("LokiHeader")
            .field("magic", &self.magic.as_bstr())
            .field("recovery", &self.recovery.get())
            .field("build", &util::trim_nul(&build).as_bstr())
            .field("orig_kernel_size", &self.orig_kernel_size.get())
            .field("orig_ramdisk_size", &self.orig_ramdisk_size.get())
            .field("ramdisk_addr", &format_args!("{:#x}", self.ramdisk_addr.get()))
            .finish()
    }
}

/// Borrowed views of both headers of a Loki image.
#[derive(Debug)]
pub struct LokiImage<'a> {
    pub boot: &'a BootImageHeader,
    pub loki: &'a LokiHeader,
}

impl<'a> LokiImage<'a> {
    /// Parse the headers in place. This fails if the image is not a boot image
    /// or if the Loki magic is missing.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let boot = BootImageHeader::ref_from_image(data)?;

        let loki_data = data
            .get(LOKI_HEADER_OFFSET..)
            .ok_or(Error::TooSmall(data.len()))?;
        let (loki, _) =
            LokiHeader::ref_from_prefix(loki_data).map_err(|_| Error::TooSmall(data.len()))?;

        if loki.magic != LOKI_MAGIC {
            return Err(Error::UnknownMagic(loki.magic));
        }

        Ok(Self { boot, loki })
    }
}

/// Bootloader families, which differ in where aboot is loaded in memory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbootFamily {
    G2,
    Samsung,
    Lg,
}

impl AbootFamily {
    /// Guess the family from the address range the ramdisk is loaded at.
    pub fn from_ramdisk_addr(addr: u32) -> Self {
        if addr < ABOOT_BASE_SAMSUNG {
            Self::G2
        } else if addr < ABOOT_BASE_LG {
            Self::Samsung
        } else {
            Self::Lg
        }
    }

    pub fn base(self) -> u32 {
        match self {
            Self::G2 => ABOOT_BASE_G2,
            Self::Samsung => ABOOT_BASE_SAMSUNG,
            Self::Lg => ABOOT_BASE_LG,
        }
    }
}

/// A location in aboot where a known pattern was found.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PatchCandidate {
    pub offset: usize,
    pub family: AbootFamily,
    /// Index into [`PATTERNS`].
    pub pattern: usize,
}

/// Find the vulnerable function in `aboot` given the ramdisk address from a
/// Loki image. Only the first [`ABOOT_WINDOW`] bytes of `aboot` are searched.
pub fn find_patch_site(ramdisk_addr: u32, aboot: &[u8]) -> Result<PatchCandidate> {
    let window = &aboot[..aboot.len().min(ABOOT_WINDOW)];
    let family = AbootFamily::from_ramdisk_addr(ramdisk_addr);
    let max_offset = window.len() as i64 - PATTERN_SIZE as i64;

    debug!(
        "Searching aboot ({:?}) for {family:?} pattern at {ramdisk_addr:#x}",
        util::NumBytes(window.len()),
    );

    for offs in SCAN_OFFSETS {
        let offset = i64::from(ramdisk_addr) - i64::from(family.base()) + i64::from(offs);
        if offset < 0 || offset > max_offset {
            return Err(Error::OffsetOutOfBounds(offset));
        }

        let offset = offset as usize;
        let code = &window[offset..offset + PATTERN_SIZE];

        if let Some(pattern) = PATTERNS.iter().position(|p| p == code) {
            debug!(
                "Found pattern #{} ({}) at {offset:#x}",
                pattern + 1,
                hex::encode(code),
            );

            return Ok(PatchCandidate {
                offset,
                family,
                pattern,
            });
        }
    }

    Err(Error::NoPatternMatch)
}
