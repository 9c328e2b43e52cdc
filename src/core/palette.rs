// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Palette RAM shared by the CLUT upload path and the pre-resolved decoder.
//!
//! Colours are 16-bit host values grouped into rows of 16 pens. Every write
//! marks its row dirty; the high-layer cache consumes those marks at frame
//! start to purge tiles whose colours were baked with the old row.

use std::ops::Range;

use bitvec::prelude::*;

/// Pens per palette row.
pub const PENS_PER_ROW: usize = 16;

/// 16-bit colour RAM with per-row dirty tracking.
#[derive(Clone, Debug)]
pub struct PaletteRam {
    colors: Vec<u16>,
    dirty_rows: BitVec,
}

impl PaletteRam {
    /// Palette with `banks * colors_per_bank` entries, all black.
    pub fn new(banks: usize, colors_per_bank: usize) -> Self {
        let len = banks * colors_per_bank;
        Self {
            colors: vec![0; len],
            dirty_rows: bitvec![0; len.div_ceil(PENS_PER_ROW)],
        }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[u16] {
        &self.colors
    }

    pub fn read(&self, index: usize) -> u16 {
        self.colors.get(index).copied().unwrap_or(0)
    }

    /// Store a colour and mark its row dirty. Writes past the end are ignored.
    pub fn write(&mut self, index: usize, color: u16) {
        if let Some(slot) = self.colors.get_mut(index) {
            if *slot != color {
                *slot = color;
                self.dirty_rows.set(index / PENS_PER_ROW, true);
            }
        }
    }

    /// The 16 pens of `row`, or `None` past the end of palette RAM.
    pub fn row(&self, row: usize) -> Option<&[u16]> {
        let start = row.checked_mul(PENS_PER_ROW)?;
        self.colors.get(start..start + PENS_PER_ROW)
    }

    pub fn is_row_dirty(&self, row: usize) -> bool {
        self.dirty_rows.get(row).is_some_and(|bit| *bit)
    }

    pub fn mark_row_dirty(&mut self, row: usize) {
        if row < self.dirty_rows.len() {
            self.dirty_rows.set(row, true);
        }
    }

    /// True if any row in `rows` is dirty.
    pub fn any_dirty(&self, rows: Range<usize>) -> bool {
        let end = rows.end.min(self.dirty_rows.len());
        let start = rows.start.min(end);
        self.dirty_rows[start..end].any()
    }

    /// Dirty rows inside `rows`, relative to `rows.start`.
    pub fn dirty_in(&self, rows: Range<usize>) -> Vec<usize> {
        let end = rows.end.min(self.dirty_rows.len());
        let start = rows.start.min(end);
        self.dirty_rows[start..end].iter_ones().collect()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty_rows.fill(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_write_marks_row_dirty() {
        let mut pal = PaletteRam::new(1, 3072);
        pal.write(5 * 16 + 3, 0x7fff);
        assert!(pal.is_row_dirty(5));
        assert!(!pal.is_row_dirty(4));
        assert_eq!(pal.row(5).map(|r| r[3]), Some(0x7fff));
    }

    #[test]
    fn palette_same_value_write_stays_clean() {
        let mut pal = PaletteRam::new(1, 256);
        pal.write(0, 0);
        assert!(!pal.any_dirty(0..16));
    }

    #[test]
    fn palette_dirty_window_is_relative() {
        let mut pal = PaletteRam::new(1, 3072);
        pal.mark_row_dirty(64 + 5);
        pal.mark_row_dirty(64 + 31);
        pal.mark_row_dirty(96);
        assert_eq!(pal.dirty_in(64..96), vec![5, 31]);
        pal.clear_dirty();
        assert!(!pal.any_dirty(0..192));
    }

    #[test]
    fn palette_out_of_range_is_ignored() {
        let mut pal = PaletteRam::new(2, 16);
        pal.write(32, 1);
        pal.mark_row_dirty(99);
        assert_eq!(pal.read(32), 0);
        assert!(pal.row(2).is_none());
        assert!(!pal.any_dirty(0..100));
    }
}
