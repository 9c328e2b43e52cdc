// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

/// Read-only graphics ROM region holding planar tile data.
///
/// The region is addressed in bytes. Reads past the end behave like an
/// unmapped bus and return all-ones, which every CPS routine treats as the
/// transparent pen.
#[derive(Clone, Debug, Default)]
pub struct GfxRom {
    data: Vec<u8>,
}

impl GfxRom {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Zero-filled region of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self { data: vec![0; len] }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read a byte, unmapped reads return 0xff
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data.get(offset).copied().unwrap_or(0xff)
    }

    /// Read little-endian u32
    pub fn read_u32(&self, offset: usize) -> u32 {
        match self.data.get(offset..offset + 4) {
            Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            None => {
                let b0 = self.read_u8(offset) as u32;
                let b1 = self.read_u8(offset.wrapping_add(1)) as u32;
                let b2 = self.read_u8(offset.wrapping_add(2)) as u32;
                let b3 = self.read_u8(offset.wrapping_add(3)) as u32;
                b0 | (b1 << 8) | (b2 << 16) | (b3 << 24)
            }
        }
    }

    /// Borrow `len` bytes at `offset` if the whole range is mapped.
    pub fn tile_bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.data.get(offset..offset.checked_add(len)?)
    }

    /// Write access for loaders and tests; the render path never mutates ROM.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl From<Vec<u8>> for GfxRom {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}
