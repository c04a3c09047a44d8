// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Pre-4.4 shared property area.
//!
//! The area starts with a small header followed by a table of contents. Each
//! TOC entry packs the name length into the top 8 bits and the byte offset of
//! the entry's [`RawPropInfo`] into the low 24 bits. Entries are laid out
//! sequentially starting at [`PA_INFO_START`]. Values are in native byte order
//! since the area is shared between processes on the same device.

use std::fmt;

use bstr::ByteSlice;
use thiserror::Error;
use zerocopy::{FromBytes, FromZeros, IntoBytes, native_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::util;

pub const PROP_AREA_MAGIC: u32 = 0x504f5250;
pub const PROP_AREA_VERSION: u32 = 0x45434f76;

pub const PROP_NAME_MAX: usize = 32;
pub const PROP_VALUE_MAX: usize = 92;

/// Maximum number of entries the TOC can describe.
pub const PA_COUNT_MAX: usize = 247;
/// Offset of the first entry.
pub const PA_INFO_START: usize = 1024;

const TOC_OFFSET: usize = size_of::<RawAreaHeader>();

#[derive(Debug, Error)]
pub enum Error {
    #[error("Property area size must be between {PA_INFO_START} and {max} bytes: {0}", max = 1 << 24)]
    InvalidSize(usize),
    #[error("Invalid property name: {0:?}")]
    InvalidName(String),
    #[error("Property value is too long for {0:?}: {1} bytes")]
    ValueTooLong(String, usize),
    #[error("Read-only property cannot be modified: {0:?}")]
    ReadOnly(String),
    #[error("Property area is full: {0} entries")]
    Full(usize),
    #[error("Property area is corrupt")]
    Corrupt,
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
pub struct RawAreaHeader {
    pub count: native_endian::U32,
    pub serial: native_endian::U32,
    /// Magic value. This should be equal to [`PROP_AREA_MAGIC`].
    pub magic: native_endian::U32,
    pub version: native_endian::U32,
    pub reserved: [native_endian::U32; 4],
}

/// A single property. The top 8 bits of `serial` hold the value length.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
pub struct RawPropInfo {
    pub name: [u8; PROP_NAME_MAX],
    pub serial: native_endian::U32,
    pub value: [u8; PROP_VALUE_MAX],
}

impl RawPropInfo {
    fn value_len(&self) -> usize {
        (self.serial.get() >> 24) as usize
    }
}

impl fmt::Debug for RawPropInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name;
        let value = self.value;

        f.debug_struct("RawPropInfo")
            .field("name", &util::trim_nul(&name).as_bstr())
            .field("serial", &format_args!("{:#x}", self.serial.get()))
            .field("value", &util::trim_nul(&value).as_bstr())
            .finish()
    }
}

/// Fixed-size in-memory property area that can be handed to legacy processes.
pub struct PropertyArea {
    data: Vec<u8>,
    capacity: usize,
}

impl PropertyArea {
    /// Create an empty area of `size` bytes.
    pub fn new(size: usize) -> Result<Self> {
        // TOC offsets only have 24 bits.
        if !(PA_INFO_START..=1 << 24).contains(&size) {
            return Err(Error::InvalidSize(size));
        }

        let mut data = vec![0u8; size];
        let capacity = PA_COUNT_MAX.min((size - PA_INFO_START) / size_of::<RawPropInfo>());

        let mut header = RawAreaHeader::new_zeroed();
        header.magic = native_endian::U32::new(PROP_AREA_MAGIC);
        header.version = native_endian::U32::new(PROP_AREA_VERSION);
        header
            .write_to_prefix(&mut data)
            .map_err(|_| Error::InvalidSize(size))?;

        Ok(Self { data, capacity })
    }

    /// Parse an existing area, checking the header and every TOC entry.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let size = data.len();
        if !(PA_INFO_START..=1 << 24).contains(&size) {
            return Err(Error::InvalidSize(size));
        }

        let area = Self {
            capacity: PA_COUNT_MAX.min((size - PA_INFO_START) / size_of::<RawPropInfo>()),
            data,
        };

        let header = area.header()?;
        if header.magic.get() != PROP_AREA_MAGIC || header.version.get() != PROP_AREA_VERSION {
            return Err(Error::Corrupt);
        } else if header.count.get() as usize > area.capacity {
            return Err(Error::Corrupt);
        }

        for i in 0..area.len() {
            area.info(i)?;
        }

        Ok(area)
    }

    fn header(&self) -> Result<&RawAreaHeader> {
        RawAreaHeader::ref_from_prefix(&self.data)
            .map(|(h, _)| h)
            .map_err(|_| Error::Corrupt)
    }

    fn header_mut(&mut self) -> Result<&mut RawAreaHeader> {
        RawAreaHeader::mut_from_prefix(&mut self.data)
            .map(|(h, _)| h)
            .map_err(|_| Error::Corrupt)
    }

    fn toc_entry(&self, index: usize) -> Result<u32> {
        let offset = TOC_OFFSET + index * 4;
        let (entry, _) = native_endian::U32::read_from_prefix(
            self.data.get(offset..).ok_or(Error::Corrupt)?,
        )
        .map_err(|_| Error::Corrupt)?;

        Ok(entry.get())
    }

    fn info(&self, index: usize) -> Result<&RawPropInfo> {
        let offset = (self.toc_entry(index)? & 0xffffff) as usize;
        let (info, _) = RawPropInfo::ref_from_prefix(self.data.get(offset..).ok_or(Error::Corrupt)?)
            .map_err(|_| Error::Corrupt)?;

        if info.value_len() >= PROP_VALUE_MAX {
            return Err(Error::Corrupt);
        }

        Ok(info)
    }

    fn find(&self, name: &str) -> Option<usize> {
        (0..self.len()).find(|&i| {
            let Ok(toc) = self.toc_entry(i) else {
                return false;
            };
            let name_len = (toc >> 24) as usize;

            name_len < PROP_NAME_MAX
                && name_len == name.len()
                && self
                    .info(i)
                    .is_ok_and(|info| &info.name[..name_len] == name.as_bytes())
        })
    }

    /// Number of properties in the area.
    pub fn len(&self) -> usize {
        self.header().map_or(0, |h| h.count.get() as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        let index = self.find(name)?;
        let info = self.info(index).ok()?;

        Some(&info.value[..info.value_len()])
    }

    /// Add a property or update an existing one. Properties starting with
    /// `ro.` cannot be changed once set.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() || name.len() >= PROP_NAME_MAX || name.contains('\0') {
            return Err(Error::InvalidName(name.to_owned()));
        } else if value.len() >= PROP_VALUE_MAX {
            return Err(Error::ValueTooLong(name.to_owned(), value.len()));
        }

        let (offset, serial) = match self.find(name) {
            Some(index) => {
                if name.starts_with("ro.") {
                    return Err(Error::ReadOnly(name.to_owned()));
                }

                let offset = (self.toc_entry(index)? & 0xffffff) as usize;
                let old = self.info(index)?.serial.get();

                (offset, old.wrapping_add(1) & 0xffffff)
            }
            None => {
                let count = self.len();
                if count == self.capacity {
                    return Err(Error::Full(count));
                }

                let offset = PA_INFO_START + count * size_of::<RawPropInfo>();
                let toc = ((name.len() as u32) << 24) | offset as u32;

                let toc_offset = TOC_OFFSET + count * 4;
                self.data[toc_offset..toc_offset + 4]
                    .copy_from_slice(native_endian::U32::new(toc).as_bytes());

                self.header_mut()?.count = native_endian::U32::new(count as u32 + 1);

                (offset, 0)
            }
        };

        let mut info = RawPropInfo::new_zeroed();
        info.name[..name.len()].copy_from_slice(name.as_bytes());
        info.value[..value.len()].copy_from_slice(value.as_bytes());
        info.serial = native_endian::U32::new(((value.len() as u32) << 24) | serial);

        info.write_to_prefix(&mut self.data[offset..])
            .map_err(|_| Error::Corrupt)?;

        let header = self.header_mut()?;
        header.serial = native_endian::U32::new(header.serial.get().wrapping_add(1));

        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for PropertyArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();

        for i in 0..self.len() {
            match self.info(i) {
                Ok(info) => list.entry(info),
                Err(_) => list.entry(&format_args!("<corrupt>")),
            };
        }

        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_area() {
        let area = PropertyArea::new(32768).unwrap();
        let data = area.as_bytes();

        assert_eq!(data.len(), 32768);
        assert_eq!(&data[8..12], PROP_AREA_MAGIC.to_ne_bytes());
        assert_eq!(&data[12..16], PROP_AREA_VERSION.to_ne_bytes());
        assert!(area.is_empty());

        assert_matches!(PropertyArea::new(512), Err(Error::InvalidSize(512)));
    }

    #[test]
    fn entry_layout() {
        let mut area = PropertyArea::new(32768).unwrap();
        area.set("ro.product.device", "hammerhead").unwrap();
        area.set("ro.build.id", "KOT49H").unwrap();

        let data = area.as_bytes();
        assert_eq!(&data[0..4], 2u32.to_ne_bytes());

        // Second TOC entry points to the second info slot.
        let toc = u32::from_ne_bytes(data[36..40].try_into().unwrap());
        assert_eq!(toc >> 24, 11);
        assert_eq!((toc & 0xffffff) as usize, PA_INFO_START + 128);

        let info = &data[PA_INFO_START..PA_INFO_START + 128];
        assert_eq!(&info[..18], b"ro.product.device\0");
        assert_eq!(
            u32::from_ne_bytes(info[32..36].try_into().unwrap()) >> 24,
            10,
        );
        assert_eq!(&info[36..47], b"hammerhead\0");

        let parsed = PropertyArea::from_bytes(data.to_vec()).unwrap();
        assert_eq!(parsed.get("ro.build.id"), Some(&b"KOT49H"[..]));
        assert_eq!(parsed.get("ro.build"), None);
    }

    #[test]
    fn update_rules() {
        let mut area = PropertyArea::new(4096).unwrap();
        area.set("ro.secure", "1").unwrap();
        area.set("service.adb.root", "0").unwrap();

        assert_matches!(area.set("ro.secure", "0"), Err(Error::ReadOnly(_)));
        area.set("service.adb.root", "1").unwrap();
        assert_eq!(area.get("service.adb.root"), Some(&b"1"[..]));
        assert_eq!(area.len(), 2);

        assert_matches!(area.set("", "x"), Err(Error::InvalidName(_)));
        assert_matches!(
            area.set(&"a".repeat(PROP_NAME_MAX), "x"),
            Err(Error::InvalidName(_))
        );
        assert_matches!(
            area.set("a", &"b".repeat(PROP_VALUE_MAX)),
            Err(Error::ValueTooLong(_, PROP_VALUE_MAX))
        );
    }

    #[test]
    fn capacity_limit() {
        // Room for exactly two entries.
        let mut area = PropertyArea::new(PA_INFO_START + 2 * 128 + 10).unwrap();
        area.set("a", "1").unwrap();
        area.set("b", "2").unwrap();
        assert_matches!(area.set("c", "3"), Err(Error::Full(2)));
    }

    #[test]
    fn corrupt_area() {
        assert_matches!(
            PropertyArea::from_bytes(vec![0u8; 4096]),
            Err(Error::Corrupt)
        );
    }
}
