// SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use bstr::ByteSlice;
use thiserror::Error;
use zerocopy::{FromBytes, little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::util;

pub const BOOT_MAGIC: [u8; 8] = *b"ANDROID!";
pub const BOOT_NAME_SIZE: usize = 16;
pub const BOOT_ARGS_SIZE: usize = 512;
pub const BOOT_EXTRA_ARGS_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Image is too small to contain a boot image header: {0} bytes")]
    TooSmall(usize),
    #[error("Unknown magic: {0:?}")]
    UnknownMagic([u8; 8]),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the v0 image header. Only the fields shared by every
/// legacy header version are described here since that's all the bootloader
/// checks care about.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
pub struct BootImageHeader {
    /// Magic value. This should be equal to [`BOOT_MAGIC`].
    pub magic: [u8; 8],
    pub kernel_size: little_endian::U32,
    pub kernel_addr: little_endian::U32,
    pub ramdisk_size: little_endian::U32,
    pub ramdisk_addr: little_endian::U32,
    pub second_size: little_endian::U32,
    pub second_addr: little_endian::U32,
    pub tags_addr: little_endian::U32,
    pub page_size: little_endian::U32,
    pub header_version: little_endian::U32,
    pub os_version: little_endian::U32,
    pub name: [u8; BOOT_NAME_SIZE],
    pub cmdline: [u8; BOOT_ARGS_SIZE],
    pub id: [little_endian::U32; 8],
    pub extra_cmdline: [u8; BOOT_EXTRA_ARGS_SIZE],
}

impl BootImageHeader {
    /// Borrow the header at the start of `data` without copying it. The magic
    /// is checked, but no other field is validated.
    pub fn ref_from_image(data: &[u8]) -> Result<&Self> {
        let (header, _) =
            Self::ref_from_prefix(data).map_err(|_| Error::TooSmall(data.len()))?;

        if header.magic != BOOT_MAGIC {
            return Err(Error::UnknownMagic(header.magic));
        }

        Ok(header)
    }

    pub fn ramdisk_addr(&self) -> u32 {
        self.ramdisk_addr.get()
    }
}

impl fmt::Debug for BootImageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name;
        let cmdline = self.cmdline;

        f.debug_struct("BootImageHeader")
            .field("kernel_size", &util::NumBytes(self.kernel_size.get()))
            .field("kernel_addr", &format_args!("{:#x}", self.kernel_addr.get()))
            .field("ramdisk_size", &util::NumBytes(self.ramdisk_size.get()))
            .field("ramdisk_addr", &format_args!("{:#x}", self.ramdisk_addr.get()))
            .field("second_size", &util::NumBytes(self.second_size.get()))
            .field("second_addr", &format_args!("{:#x}", self.second_addr.get()))
            .field("tags_addr", &format_args!("{:#x}", self.tags_addr.get()))
            .field("page_size", &self.page_size.get())
            .field("header_version", &self.header_version.get())
            .field("os_version", &format_args!("{:#x}", self.os_version.get()))
            .field("name", &util::trim_nul(&name).as_bstr())
            .field("cmdline", &util::trim_nul(&cmdline).as_bstr())
            .finish_non_exhaustive()
    }
}
