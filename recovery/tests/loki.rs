// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{fs, path::Path};

use assert_matches::assert_matches;
use zerocopy::{FromZeros, IntoBytes, little_endian};

use recovery::{
    format::{
        bootimage::{BOOT_MAGIC, BootImageHeader},
        loki::{
            self, ABOOT_BASE_G2, ABOOT_BASE_LG, ABOOT_BASE_SAMSUNG, ABOOT_WINDOW, AbootFamily,
            LOKI_HEADER_OFFSET, LOKI_MAGIC, LokiHeader, PATTERNS,
        },
    },
    patch::loki::{Error, LokiTargets, PartitionRole, flash, validate},
};

const IMAGE_SIZE: usize = 0x1000;

fn build_image(magic: [u8; 4], recovery: bool, ramdisk_addr: u32) -> Vec<u8> {
    let mut boot = BootImageHeader::new_zeroed();
    boot.magic = BOOT_MAGIC;
    boot.ramdisk_addr = little_endian::U32::new(ramdisk_addr);
    boot.page_size = little_endian::U32::new(2048);

    let mut lok = LokiHeader::new_zeroed();
    lok.magic = magic;
    lok.recovery = little_endian::U32::new(recovery.into());
    lok.ramdisk_addr = little_endian::U32::new(ramdisk_addr);

    let mut data = vec![0x5a; IMAGE_SIZE];
    let boot_bytes = boot.as_bytes();
    data[..boot_bytes.len()].copy_from_slice(boot_bytes);
    let lok_bytes = lok.as_bytes();
    data[LOKI_HEADER_OFFSET..LOKI_HEADER_OFFSET + lok_bytes.len()].copy_from_slice(lok_bytes);

    data
}

struct Fixture {
    _temp_dir: tempfile::TempDir,
    image: std::path::PathBuf,
    targets: LokiTargets,
}

impl Fixture {
    fn new(image: &[u8], aboot: &[u8]) -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();

        let targets = LokiTargets {
            aboot: dir.join("aboot"),
            boot: dir.join("boot"),
            recovery: dir.join("recovery"),
        };

        fs::write(&targets.aboot, aboot).unwrap();
        fs::write(&targets.boot, vec![0xff; IMAGE_SIZE * 2]).unwrap();
        fs::write(&targets.recovery, vec![0xee; IMAGE_SIZE * 2]).unwrap();

        let image_path = dir.join("image.lok");
        fs::write(&image_path, image).unwrap();

        Self {
            _temp_dir: temp_dir,
            image: image_path,
            targets,
        }
    }

    fn assert_untouched(&self) {
        assert_eq!(fs::read(&self.targets.boot).unwrap(), vec![0xff; IMAGE_SIZE * 2]);
        assert_eq!(
            fs::read(&self.targets.recovery).unwrap(),
            vec![0xee; IMAGE_SIZE * 2],
        );
    }
}

fn aboot_with_pattern(size: usize, offset: usize, pattern: usize) -> Vec<u8> {
    let mut aboot = vec![0u8; size];
    aboot[offset..offset + 8].copy_from_slice(&PATTERNS[pattern]);
    aboot
}

#[test]
fn flash_boot_image() {
    let image = build_image(LOKI_MAGIC, false, ABOOT_BASE_G2 + 0x100);
    let fixture = Fixture::new(&image, &aboot_with_pattern(0x1000, 0x104, 2));

    let report = flash(PartitionRole::Boot, &fixture.image, &fixture.targets).unwrap();
    assert_eq!(report.device, fixture.targets.boot);
    assert_eq!(report.candidate.offset, 0x104);
    assert_eq!(report.candidate.family, AbootFamily::G2);
    assert_eq!(report.candidate.pattern, 2);
    assert_eq!(report.size, IMAGE_SIZE);

    // The image is written as-is and the rest of the partition is preserved.
    let written = fs::read(&fixture.targets.boot).unwrap();
    assert_eq!(written.len(), IMAGE_SIZE * 2);
    assert_eq!(&written[..IMAGE_SIZE], image.as_slice());
    assert!(written[IMAGE_SIZE..].iter().all(|b| *b == 0xff));

    assert_eq!(
        fs::read(&fixture.targets.recovery).unwrap(),
        vec![0xee; IMAGE_SIZE * 2],
    );
}

#[test]
fn flash_recovery_image() {
    let image = build_image(LOKI_MAGIC, true, ABOOT_BASE_LG + 0x200);
    let fixture = Fixture::new(&image, &aboot_with_pattern(0x1000, 0x20c, 5));

    let report = flash(PartitionRole::Recovery, &fixture.image, &fixture.targets).unwrap();
    assert_eq!(report.device, fixture.targets.recovery);
    assert_eq!(report.candidate.family, AbootFamily::Lg);
    assert_eq!(report.candidate.pattern, 5);

    let written = fs::read(&fixture.targets.recovery).unwrap();
    assert_eq!(&written[..IMAGE_SIZE], image.as_slice());
}

#[test]
fn not_a_loki_image() {
    let image = build_image(*b"LOKX", false, ABOOT_BASE_G2 + 0x100);
    let fixture = Fixture::new(&image, &aboot_with_pattern(0x1000, 0x100, 0));

    let err = flash(PartitionRole::Boot, &fixture.image, &fixture.targets).unwrap_err();
    assert_matches!(err, Error::InvalidImage(_, loki::Error::UnknownMagic(m)) if &m == b"LOKX");
    assert!(err.is_retryable());
    fixture.assert_untouched();
}

#[test]
fn not_a_boot_image() {
    let mut image = build_image(LOKI_MAGIC, false, ABOOT_BASE_G2 + 0x100);
    image[..8].copy_from_slice(b"NOTBOOT!");
    let fixture = Fixture::new(&image, &aboot_with_pattern(0x1000, 0x100, 0));

    assert_matches!(
        flash(PartitionRole::Boot, &fixture.image, &fixture.targets),
        Err(Error::InvalidImage(_, loki::Error::BootImage(_)))
    );
    fixture.assert_untouched();

    let fixture = Fixture::new(&image[..0x500], &aboot_with_pattern(0x1000, 0x100, 0));
    assert_matches!(
        flash(PartitionRole::Boot, &fixture.image, &fixture.targets),
        Err(Error::InvalidImage(_, _))
    );
}

#[test]
fn wrong_role() {
    let image = build_image(LOKI_MAGIC, true, ABOOT_BASE_G2 + 0x100);
    let fixture = Fixture::new(&image, &aboot_with_pattern(0x1000, 0x100, 0));

    let err = flash(PartitionRole::Boot, &fixture.image, &fixture.targets).unwrap_err();
    assert_matches!(
        err,
        Error::RoleMismatch {
            expected: PartitionRole::Boot,
            ..
        }
    );
    assert!(err.is_retryable());
    fixture.assert_untouched();
}

#[test]
fn unknown_partition_flag() {
    let mut image = build_image(LOKI_MAGIC, true, ABOOT_BASE_G2 + 0x100);
    // Flag field follows the 4-byte magic.
    image[LOKI_HEADER_OFFSET + 4..LOKI_HEADER_OFFSET + 8].copy_from_slice(&2u32.to_le_bytes());
    let fixture = Fixture::new(&image, &aboot_with_pattern(0x1000, 0x100, 0));

    for role in [PartitionRole::Boot, PartitionRole::Recovery] {
        assert_matches!(
            flash(role, &fixture.image, &fixture.targets),
            Err(Error::RoleMismatch { expected, .. }) if expected == role
        );
    }
    fixture.assert_untouched();
}

#[test]
fn device_mismatch() {
    let image = build_image(LOKI_MAGIC, false, ABOOT_BASE_SAMSUNG + 0x100);
    // Pattern is one slot past the last scanned offset.
    let fixture = Fixture::new(&image, &aboot_with_pattern(0x1000, 0x110, 1));

    let err = flash(PartitionRole::Boot, &fixture.image, &fixture.targets).unwrap_err();
    assert_matches!(err, Error::DeviceMismatch(loki::Error::NoPatternMatch));
    assert!(err.is_retryable());
    fixture.assert_untouched();
}

#[test]
fn offset_outside_window() {
    // Below the base address of the family.
    let image = build_image(LOKI_MAGIC, false, ABOOT_BASE_G2 - 4);
    let fixture = Fixture::new(&image, &aboot_with_pattern(0x1000, 0, 0));

    assert_matches!(
        flash(PartitionRole::Boot, &fixture.image, &fixture.targets),
        Err(Error::InvalidImage(_, loki::Error::OffsetOutOfBounds(-4)))
    );
    fixture.assert_untouched();

    // Only the first window of aboot is read, even if the partition is larger.
    let offset = ABOOT_WINDOW - 4;
    let image = build_image(LOKI_MAGIC, false, ABOOT_BASE_G2 + offset as u32);
    let fixture = Fixture::new(&image, &aboot_with_pattern(ABOOT_WINDOW + 0x10, offset, 0));

    assert_matches!(
        validate(PartitionRole::Boot, &fixture.image, &fixture.targets),
        Err(Error::InvalidImage(_, loki::Error::OffsetOutOfBounds(_)))
    );
    fixture.assert_untouched();
}

#[test]
fn missing_inputs() {
    let image = build_image(LOKI_MAGIC, false, ABOOT_BASE_G2 + 0x100);
    let fixture = Fixture::new(&image, &aboot_with_pattern(0x1000, 0x100, 0));

    assert_matches!(
        flash(PartitionRole::Boot, Path::new("/nonexistent/image.lok"), &fixture.targets),
        Err(Error::ImageRead(_, _))
    );

    let targets = LokiTargets {
        aboot: fixture.targets.aboot.with_extension("missing"),
        ..fixture.targets.clone()
    };
    assert_matches!(
        flash(PartitionRole::Boot, &fixture.image, &targets),
        Err(Error::AbootRead(_, _))
    );
    fixture.assert_untouched();
}

#[test]
fn unwritable_device() {
    let image = build_image(LOKI_MAGIC, false, ABOOT_BASE_G2 + 0x100);
    let fixture = Fixture::new(&image, &aboot_with_pattern(0x1000, 0x100, 0));

    // The device node is never created.
    let targets = LokiTargets {
        boot: fixture.targets.boot.with_extension("missing"),
        ..fixture.targets.clone()
    };

    let err = flash(PartitionRole::Boot, &fixture.image, &targets).unwrap_err();
    assert_matches!(err, Error::Flash(_, _));
    assert!(!err.is_retryable());
    assert!(!targets.boot.exists());
}
