// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Graphics ROM tile decoding.
//!
//! CPS and Neo-Geo sprite ROMs store each tile line as little-endian 32-bit
//! words of eight 4-bit pens. In the *interleaved* order the nibbles of a
//! word land on pixels 0,4,1,5,2,6,3,7: the even nibbles fill the first four
//! pixels and the odd nibbles the last four. The Neo-Geo fix layer stores its
//! nibbles *linearly*.
//!
//! Two output modes exist:
//!
//! - [`decode_indexed`] keeps the pen in the low nibble of each texel and ORs
//!   the palette bank into the high nibble through [`COLOR_TABLE`], four
//!   texels per store. The CLUT resolves colours at blit time.
//! - [`decode_resolved`] applies a palette row while decoding and substitutes
//!   [`TRANSPARENT_SENTINEL`] for pens excluded by a transparent-pen mask.
//!
//! [`classify_tile`] computes the per-code pen usage used by the software
//! renderer to skip blank tiles and pick opaque routines.

use crate::atlas::{TileMut, TileSize};
use crate::core::GfxRom;

/// Bank nibble replicated into every byte of a 32-bit store.
pub const COLOR_TABLE: [u32; 16] = [
    0x0000_0000, 0x1010_1010, 0x2020_2020, 0x3030_3030,
    0x4040_4040, 0x5050_5050, 0x6060_6060, 0x7070_7070,
    0x8080_8080, 0x9090_9090, 0xa0a0_a0a0, 0xb0b0_b0b0,
    0xc0c0_c0c0, 0xd0d0_d0d0, 0xe0e0_e0e0, 0xf0f0_f0f0,
];

/// Direct-colour value meaning "draw nothing".
pub const TRANSPARENT_SENTINEL: u16 = 0x8000;

/// Transparent-pen mask that keeps pens 0..=14 and resolves through the
/// palette unchanged.
pub const ALL_PENS: u16 = 0x7fff;

/// Pixel position of each nibble (by nibble index) in an interleaved word.
pub const INTERLEAVED_PIXEL: [usize; 8] = [0, 4, 1, 5, 2, 6, 3, 7];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-config", serde(rename_all = "snake_case"))]
pub enum NibbleOrder {
    Interleaved,
    Linear,
}

/// Where a tile's lines live in graphics ROM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
pub struct RomLayout {
    pub order: NibbleOrder,
    /// Bytes per tile code, as a shift.
    pub code_shift: u32,
    /// Bytes between consecutive tile lines.
    pub line_stride: usize,
    /// Byte offset of the used words inside each line.
    pub line_offset: usize,
}

impl RomLayout {
    /// CPS 16x16: `code << 7`, two words per 8-byte line.
    pub const CPS_16: Self = Self::new(NibbleOrder::Interleaved, 7, 8, 0);
    /// CPS 32x32: `code << 9`, four words per 16-byte line.
    pub const CPS_32: Self = Self::new(NibbleOrder::Interleaved, 9, 16, 0);
    /// CPS2 8x8: upper word of each 8-byte line.
    pub const CPS2_8: Self = Self::new(NibbleOrder::Interleaved, 6, 8, 4);
    /// Neo-Geo fix: `code << 5`, one linear word per line.
    pub const NEO_FIX: Self = Self::new(NibbleOrder::Linear, 5, 4, 0);
    /// Neo-Geo sprite: same shape as CPS 16x16.
    pub const NEO_SPRITE: Self = Self::CPS_16;

    pub const fn new(order: NibbleOrder, code_shift: u32, line_stride: usize, line_offset: usize) -> Self {
        Self {
            order,
            code_shift,
            line_stride,
            line_offset,
        }
    }

    /// CPS1 8x8: the graphics set picks which word of each 8-byte line.
    pub const fn cps1_8(gfxset: u16) -> Self {
        Self::new(NibbleOrder::Interleaved, 6, 8, (gfxset as usize & 1) << 2)
    }

    /// Byte offset of `line` of tile `code`.
    pub fn line_base(&self, code: u32, line: usize) -> usize {
        ((code as usize) << self.code_shift) + self.line_offset + line * self.line_stride
    }
}

/// Unpack one ROM word into eight pens in pixel order.
#[inline]
pub fn unpack_word(word: u32, order: NibbleOrder) -> [u8; 8] {
    let mut pens = [0u8; 8];
    for nibble in 0..8 {
        let pen = ((word >> (nibble * 4)) & 0x0f) as u8;
        let pixel = match order {
            NibbleOrder::Interleaved => INTERLEAVED_PIXEL[nibble],
            NibbleOrder::Linear => nibble,
        };
        pens[pixel] = pen;
    }
    pens
}

/// Decode `code` into an indexed tile tagged with palette `bank`.
pub fn decode_indexed(rom: &GfxRom, layout: RomLayout, code: u32, bank: u8, tile: &mut TileMut<'_, u8>) {
    let col = COLOR_TABLE[(bank & 0x0f) as usize];
    let words = tile.size() / 8;

    for (line, row) in tile.rows_mut().enumerate() {
        let base = layout.line_base(code, line);
        for (w, texels) in row.chunks_exact_mut(8).take(words).enumerate() {
            let word = rom.read_u32(base + w * 4);
            let (lo, hi) = match layout.order {
                NibbleOrder::Interleaved => ((word & 0x0f0f_0f0f) | col, ((word >> 4) & 0x0f0f_0f0f) | col),
                NibbleOrder::Linear => (
                    (word & 0x0000_000f)
                        | ((word & 0x0000_00f0) << 4)
                        | ((word & 0x0000_0f00) << 8)
                        | ((word & 0x0000_f000) << 12)
                        | col,
                    ((word & 0x000f_0000) >> 16)
                        | ((word & 0x00f0_0000) >> 12)
                        | ((word & 0x0f00_0000) >> 8)
                        | ((word & 0xf000_0000) >> 4)
                        | col,
                ),
            };
            texels[..4].copy_from_slice(&lo.to_le_bytes());
            texels[4..].copy_from_slice(&hi.to_le_bytes());
        }
    }
    log::trace!("decoded indexed tile {code:#x} bank {bank}");
}

/// Palette row with pens outside `tpens` (and always pen 15) replaced by the
/// sentinel. `ALL_PENS` returns the row untouched.
pub fn masked_palette(row: &[u16], tpens: u16) -> [u16; 16] {
    let mut pal = [TRANSPARENT_SENTINEL; 16];
    for (pen, dst) in pal.iter_mut().enumerate() {
        if let Some(&color) = row.get(pen) {
            *dst = color;
        }
    }
    if tpens != ALL_PENS {
        for (pen, dst) in pal.iter_mut().enumerate().take(15) {
            if tpens & (1 << pen) == 0 {
                *dst = TRANSPARENT_SENTINEL;
            }
        }
        pal[15] = TRANSPARENT_SENTINEL;
    }
    pal
}

/// Decode `code` into a direct-colour tile using `palette` (see
/// [`masked_palette`]).
pub fn decode_resolved(rom: &GfxRom, layout: RomLayout, code: u32, palette: &[u16; 16], tile: &mut TileMut<'_, u16>) {
    let words = tile.size() / 8;

    for (line, row) in tile.rows_mut().enumerate() {
        let base = layout.line_base(code, line);
        for (w, texels) in row.chunks_exact_mut(8).take(words).enumerate() {
            let pens = unpack_word(rom.read_u32(base + w * 4), layout.order);
            for (dst, pen) in texels.iter_mut().zip(pens) {
                *dst = palette[pen as usize];
            }
        }
    }
    log::trace!("decoded resolved tile {code:#x}");
}

/// Pen usage of one tile code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TileClass {
    /// Every pixel is the transparent pen.
    Blank = 0,
    Transparent = 1,
    /// No pixel is the transparent pen.
    Opaque = 2,
}

impl TileClass {
    pub fn is_opaque(self) -> bool {
        self == TileClass::Opaque
    }
}

/// Classify tile `code` against `transparent_pen`.
pub fn classify_tile(rom: &GfxRom, layout: RomLayout, size: TileSize, code: u32, transparent_pen: u8) -> TileClass {
    let mut clear = 0usize;
    let mut total = 0usize;
    for line in 0..size.pixels() {
        let base = layout.line_base(code, line);
        for w in 0..size.words_per_line() {
            let pens = unpack_word(rom.read_u32(base + w * 4), layout.order);
            clear += pens.iter().filter(|&&p| p == transparent_pen).count();
            total += 8;
        }
    }
    match clear {
        0 => TileClass::Opaque,
        n if n == total => TileClass::Blank,
        _ => TileClass::Transparent,
    }
}

/// Pen usage for every tile code of a ROM.
#[derive(Clone, Debug, Default)]
pub struct PenUsage {
    classes: Vec<TileClass>,
}

impl PenUsage {
    pub fn scan(rom: &GfxRom, layout: RomLayout, size: TileSize, transparent_pen: u8) -> Self {
        let tile_bytes = 1usize << layout.code_shift;
        let codes = rom.len() / tile_bytes;
        let classes = (0..codes as u32)
            .map(|code| classify_tile(rom, layout, size, code, transparent_pen))
            .collect();
        Self { classes }
    }

    /// Unknown codes are treated as transparent so they are never skipped.
    pub fn get(&self, code: u32) -> TileClass {
        self.classes.get(code as usize).copied().unwrap_or(TileClass::Transparent)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
