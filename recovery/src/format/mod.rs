/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod bootimage;
pub mod loki;
pub mod ota;
pub mod proparea;
pub mod zip;
