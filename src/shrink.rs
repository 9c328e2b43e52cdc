// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Neo-Geo sprite shrink tables.
//!
//! Horizontal shrink picks which of the 16 source pixels of a sprite line
//! survive. Level `n` keeps exactly `n` pixels following the fixed patterns
//! below; level 16 is full width and bypasses the table. Vertical shrink and
//! tall-sprite tiling come from four precomputed blobs shipped with the
//! system ROM data.

use thiserror::Error;

/// Pixel keep/skip pattern per shrink level.
#[rustfmt::skip]
pub const ZOOM_X_TABLES: [[u8; 16]; 16] = [
    [0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0],
    [0,0,0,0,0,0,0,0,1,0,0,0,0,0,0,0],
    [0,0,0,0,1,0,0,0,1,0,0,0,0,0,0,0],
    [0,0,0,0,1,0,0,0,1,0,0,0,1,0,0,0],
    [0,0,1,0,1,0,0,0,1,0,0,0,1,0,0,0],
    [0,0,1,0,1,0,0,0,1,0,0,0,1,0,1,0],
    [0,0,1,0,1,0,1,0,1,0,0,0,1,0,1,0],
    [0,0,1,0,1,0,1,0,1,0,1,0,1,0,1,0],
    [1,0,1,0,1,0,1,0,1,0,1,0,1,0,1,0],
    [1,0,1,0,1,0,1,0,1,1,1,0,1,0,1,0],
    [1,0,1,1,1,0,1,0,1,1,1,0,1,0,1,0],
    [1,0,1,1,1,0,1,0,1,1,1,0,1,0,1,1],
    [1,0,1,1,1,0,1,1,1,1,1,0,1,0,1,1],
    [1,0,1,1,1,0,1,1,1,1,1,0,1,1,1,1],
    [1,1,1,1,1,0,1,1,1,1,1,0,1,1,1,1],
    [1,1,1,1,1,0,1,1,1,1,1,1,1,1,1,1],
];

/// Width of a full-size sprite line.
pub const FULL_ZOOM: u8 = 16;

/// Source positions kept at shrink `level` (0..=15); 16 keeps all.
pub fn kept_pixels(level: u8) -> impl Iterator<Item = usize> {
    let table = ZOOM_X_TABLES.get(level as usize).copied();
    (0..16).filter(move |&i| match table {
        Some(t) => t[i] != 0,
        None => true,
    })
}

/// Output width of a sprite line at `level`.
pub fn shrunk_width(level: u8) -> usize {
    kept_pixels(level).count()
}

const BLOB_LEN: usize = 0x4000;
const ENTRIES_PER_ZOOM: usize = 0x40;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShrinkTableError {
    #[error("shrink table blob is {0:#x} bytes, expected {expected:#x}", expected = 4 * BLOB_LEN)]
    BadLength(usize),
}

/// Which pair of vertical tables a sprite column uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FullMode {
    /// Up to 32 tiles tall.
    Mode0,
    /// Wrap-around 512-line column.
    Mode1,
}

/// Vertical skip and tile-offset tables, indexed by `zoom_y << 6`.
#[derive(Clone, Debug)]
pub struct VerticalShrinkTables {
    skip: [Vec<u8>; 2],
    tile: [Vec<u8>; 2],
}

impl VerticalShrinkTables {
    /// Split a blob laid out as skip0, tile0, skip1, tile1 (0x4000 bytes each).
    pub fn from_blob(blob: &[u8]) -> Result<Self, ShrinkTableError> {
        if blob.len() != 4 * BLOB_LEN {
            return Err(ShrinkTableError::BadLength(blob.len()));
        }
        let part = |n: usize| blob[n * BLOB_LEN..(n + 1) * BLOB_LEN].to_vec();
        Ok(Self {
            skip: [part(0), part(2)],
            tile: [part(1), part(3)],
        })
    }

    fn tables(&self, mode: FullMode, zoom_y: u8) -> (&[u8], &[u8]) {
        let m = match mode {
            FullMode::Mode0 => 0,
            FullMode::Mode1 => 1,
        };
        let start = (zoom_y as usize) << 6;
        let end = start + ENTRIES_PER_ZOOM;
        (&self.skip[m][start..end], &self.tile[m][start..end])
    }

    /// Screen lines of one sprite column.
    ///
    /// `rows` is the 6-bit height field, `zoom_y` the vertical shrink byte,
    /// `clip` the inclusive visible line range.
    pub fn column(&self, y: i32, rows: u8, zoom_y: u8, clip: (i32, i32)) -> Vec<ColumnStep> {
        let (fullmode, total) = if rows > 0x20 {
            (FullMode::Mode1, 0x200)
        } else {
            (FullMode::Mode0, (rows as i32) << 4)
        };
        let (skip, tile) = self.tables(fullmode, zoom_y);
        let deep_skip = self.tables(FullMode::Mode0, zoom_y).0[ENTRIES_PER_ZOOM - 1];

        let mut steps = Vec::new();
        let mut line = 0i32;
        let mut pos = 0usize;
        let mut invert = false;

        while line < total {
            if pos >= ENTRIES_PER_ZOOM {
                break;
            }
            let mut sy = (y + line) & 0x1ff;
            let mut yskip = skip[pos];

            match fullmode {
                FullMode::Mode1 if yskip == 0 => {
                    pos = 0;
                    yskip = skip[0];
                }
                FullMode::Mode0 if yskip > 0x10 => {
                    yskip = deep_skip;
                    if invert {
                        sy = (sy + (skip[pos] as i32 - yskip as i32)) & 0x1ff;
                    } else {
                        invert = true;
                    }
                }
                _ => {}
            }

            let advance = skip[pos];
            if advance == 0 {
                break;
            }
            if sy + yskip as i32 > clip.0 && sy <= clip.1 {
                steps.push(ColumnStep {
                    screen_y: sy,
                    lines: yskip,
                    tile: tile[pos],
                });
            }

            line += advance as i32;
            pos += 1;
        }
        steps
    }
}

/// One tile row emitted by [`VerticalShrinkTables::column`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnStep {
    pub screen_y: i32,
    /// Screen lines this tile row covers.
    pub lines: u8,
    /// Tile index within the column's tile list.
    pub tile: u8,
}
