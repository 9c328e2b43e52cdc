// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Software fallback renderer.
//!
//! Some effects cannot be drawn as whole-tile GPU blits: a SCROLL2 band
//! narrower than a tile (line scroll) and Neo-Geo sprites shrunk per line.
//! These are drawn straight into a CPU [`Framebuffer`] by small routines
//! picked from dispatch tables. Each routine is one monomorphised copy of a
//! const-generic body, so the tables stay data and adding a variant needs no
//! new call sites.

use crate::atlas::{BUF_WIDTH, TEXTURE_HEIGHT};
use crate::core::{GfxRom, PaletteRam};
use crate::decode::{ALL_PENS, INTERLEAVED_PIXEL, PenUsage, TileClass};
use crate::shrink::{FULL_ZOOM, ZOOM_X_TABLES};

/// CPS transparent pen.
pub const CPS_TRANSPARENT_PEN: u8 = 15;
/// Neo-Geo transparent pen.
pub const NEO_TRANSPARENT_PEN: u8 = 0;

/// Direct-colour framebuffer, `BUF_WIDTH` pixels per line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Framebuffer {
    height: usize,
    pixels: Vec<u16>,
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new(TEXTURE_HEIGHT)
    }
}

impl Framebuffer {
    pub fn new(height: usize) -> Self {
        Self {
            height,
            pixels: vec![0; BUF_WIDTH * height],
        }
    }

    pub fn width(&self) -> usize {
        BUF_WIDTH
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u16> {
        if x >= BUF_WIDTH {
            return None;
        }
        self.pixels.get(y * BUF_WIDTH + x).copied()
    }

    /// Linear index of `(x, y)`; may lie outside the buffer.
    pub fn offset(x: i32, y: i32) -> isize {
        ((y as isize) << 9) + x as isize
    }

    pub fn fill(&mut self, color: u16) {
        self.pixels.fill(color);
    }

    #[inline]
    fn put(&mut self, index: isize, color: u16) {
        if let Some(px) = usize::try_from(index).ok().and_then(|i| self.pixels.get_mut(i)) {
            *px = color;
        }
    }
}

/// 16-pixel wide CPS tile routine: `lines` rows from ROM byte `src`
/// (8 bytes per row) into the framebuffer at `dst`.
pub type Blit16 = fn(&GfxRom, usize, &mut Framebuffer, isize, &[u16; 16], usize);

/// Masked variant: only pens set in the trailing `tpens` mask are drawn.
pub type Blit16Masked = fn(&GfxRom, usize, &mut Framebuffer, isize, &[u16; 16], usize, u16);

/// One Neo-Geo sprite line: two ROM words, destination, palette row, zoom.
pub type SpriteLine = fn([u32; 2], &mut Framebuffer, isize, &[u16; 16], u8);

const fn line_step(flip_y: bool) -> isize {
    if flip_y { -(BUF_WIDTH as isize) } else { BUF_WIDTH as isize }
}

#[inline]
const fn column(nibble: usize, word: usize, flip_x: bool) -> isize {
    let pos = word * 8 + INTERLEAVED_PIXEL[nibble];
    (if flip_x { 15 - pos } else { pos }) as isize
}

fn blit16<const OPAQUE: bool, const FLIP_X: bool, const FLIP_Y: bool>(
    rom: &GfxRom,
    src: usize,
    fb: &mut Framebuffer,
    dst: isize,
    pal: &[u16; 16],
    lines: usize,
) {
    let step = line_step(FLIP_Y);
    for line in 0..lines {
        let row = dst + line as isize * step;
        for word in 0..2 {
            let tile = rom.read_u32(src + line * 8 + word * 4);
            if !OPAQUE && !tile == 0 {
                continue;
            }
            for nibble in 0..8 {
                let pen = ((tile >> (nibble * 4)) & 0x0f) as u8;
                if OPAQUE || pen != CPS_TRANSPARENT_PEN {
                    fb.put(row + column(nibble, word, FLIP_X), pal[pen as usize]);
                }
            }
        }
    }
}

fn blit16_masked<const FLIP_X: bool, const FLIP_Y: bool>(
    rom: &GfxRom,
    src: usize,
    fb: &mut Framebuffer,
    dst: isize,
    pal: &[u16; 16],
    lines: usize,
    tpens: u16,
) {
    let step = line_step(FLIP_Y);
    for line in 0..lines {
        let row = dst + line as isize * step;
        for word in 0..2 {
            let tile = rom.read_u32(src + line * 8 + word * 4);
            if tile == 0xffff_ffff {
                continue;
            }
            for nibble in 0..8 {
                let pen = (tile >> (nibble * 4)) & 0x0f;
                if tpens & (1 << pen) != 0 {
                    fb.put(row + column(nibble, word, FLIP_X), pal[pen as usize]);
                }
            }
        }
    }
}

/// Indexed by [`blit16_index`].
pub const DRAWGFX16: [Blit16; 8] = [
    blit16::<false, false, false>,
    blit16::<true, false, false>,
    blit16::<false, true, false>,
    blit16::<true, true, false>,
    blit16::<false, false, true>,
    blit16::<true, false, true>,
    blit16::<false, true, true>,
    blit16::<true, true, true>,
];

/// Normal, flip-x, flip-y, flip-xy.
pub const DRAWGFX16_MASKED: [Blit16Masked; 4] = [
    blit16_masked::<false, false>,
    blit16_masked::<true, false>,
    blit16_masked::<false, true>,
    blit16_masked::<true, true>,
];

/// `opaque | ((attr & 0x60) >> 4)`.
pub fn blit16_index(class: TileClass, attr: u16) -> usize {
    usize::from(class.is_opaque()) | ((attr & 0x60) >> 4) as usize
}

/// Visible band of the SCROLL2 layer. `max_y` is exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scroll2Clip {
    pub min_y: i32,
    pub max_y: i32,
}

impl Default for Scroll2Clip {
    fn default() -> Self {
        Self::new(16, 239)
    }
}

impl Scroll2Clip {
    /// Band from the inclusive line range `min_y..=max_y`.
    pub const fn new(min_y: i32, max_y: i32) -> Self {
        Self {
            min_y,
            max_y: max_y + 1,
        }
    }

    pub const fn lines(&self) -> i32 {
        self.max_y - self.min_y
    }

    /// Bands of a whole tile or more go through the GPU.
    pub const fn uses_hardware(&self) -> bool {
        self.lines() >= 16
    }

    /// Screen lines `sy..ey` a tile at `y` covers inside the band.
    pub fn span(&self, y: i32) -> Option<(i32, i32)> {
        let sy = self.min_y.max(y);
        let ey = self.max_y.min(y + 16);
        (ey > sy).then_some((sy, ey))
    }
}

fn palette_row(palette: &PaletteRam, row: usize) -> [u16; 16] {
    let mut pal = [0u16; 16];
    if let Some(colors) = palette.row(row) {
        for (dst, src) in pal.iter_mut().zip(colors) {
            *dst = *src;
        }
    }
    pal
}

/// Per-tile inputs of a SCROLL2 software draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scroll2Tile {
    pub x: i32,
    pub y: i32,
    pub code: u32,
    pub attr: u16,
    /// Pens to draw; [`ALL_PENS`] selects the unmasked routines.
    pub tpens: u16,
}

/// Palette row base of the SCROLL2 layer.
pub const SCROLL2_PALETTE_ROW: usize = 64;

/// Draw the part of a 16x16 SCROLL2 tile inside `clip`.
///
/// Returns `false` when nothing was drawn: the tile misses the band or is
/// blank.
pub fn draw_scroll2_tile(
    fb: &mut Framebuffer,
    rom: &GfxRom,
    usage: &PenUsage,
    palette: &PaletteRam,
    clip: Scroll2Clip,
    tile: Scroll2Tile,
) -> bool {
    let Some((sy, ey)) = clip.span(tile.y) else {
        return false;
    };
    let class = usage.get(tile.code);
    if class == TileClass::Blank {
        return false;
    }

    let mut src = (tile.code as usize) << 7;
    let dst = if tile.attr & 0x40 != 0 {
        src += (((tile.y + 16) - ey) as usize) << 3;
        Framebuffer::offset(tile.x, ey - 1)
    } else {
        src += ((sy - tile.y) as usize) << 3;
        Framebuffer::offset(tile.x, sy)
    };
    let pal = palette_row(palette, (tile.attr & 0x1f) as usize + SCROLL2_PALETTE_ROW);
    let lines = (ey - sy) as usize;

    if tile.tpens == ALL_PENS {
        DRAWGFX16[blit16_index(class, tile.attr)](rom, src, fb, dst, &pal, lines);
    } else {
        let func = ((tile.attr & 0x60) >> 5) as usize;
        DRAWGFX16_MASKED[func](rom, src, fb, dst, &pal, lines, tile.tpens & ALL_PENS);
    }
    true
}

fn sprite_line<const FLIP: bool, const OPAQUE: bool, const FIXED: bool>(
    words: [u32; 2],
    fb: &mut Framebuffer,
    dst: isize,
    pal: &[u16; 16],
    zoom: u8,
) {
    let keep = ZOOM_X_TABLES.get(zoom as usize);
    let mut cursor = dst;
    for i in 0..16 {
        let pixel = if FLIP { 15 - i } else { i };
        let word = words[pixel / 8];
        let nibble = PIXEL_NIBBLE[pixel % 8];
        let pen = ((word >> (nibble * 4)) & 0x0f) as u8;

        if FIXED {
            if OPAQUE || pen != NEO_TRANSPARENT_PEN {
                fb.put(dst + i as isize, pal[pen as usize]);
            }
        } else if keep.is_some_and(|t| t[i] != 0) {
            if OPAQUE || pen != NEO_TRANSPARENT_PEN {
                fb.put(cursor, pal[pen as usize]);
            }
            cursor += 1;
        }
    }
}

// Inverse of INTERLEAVED_PIXEL.
const PIXEL_NIBBLE: [usize; 8] = [0, 2, 4, 6, 1, 3, 5, 7];

/// Indexed by `flip | opaque << 1 | fixed << 2`.
pub const DRAWGFXLINE: [SpriteLine; 8] = [
    sprite_line::<false, false, false>,
    sprite_line::<true, false, false>,
    sprite_line::<false, true, false>,
    sprite_line::<true, true, false>,
    sprite_line::<false, false, true>,
    sprite_line::<true, false, true>,
    sprite_line::<false, true, true>,
    sprite_line::<true, true, true>,
];

/// One shrunk Neo-Geo sprite line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpriteLineDraw {
    pub x: i32,
    pub y: i32,
    /// Kept pixels, 1..=16; 16 draws the line unshrunk.
    pub zoom_x: u8,
    /// Source line inside the tile, 0..16.
    pub sprite_y: u8,
    pub code: u32,
    pub attr: u16,
    pub opaque: bool,
}

/// Draw one line of a Neo-Geo sprite. `palette_base_row` selects the
/// active palette bank.
pub fn draw_sprite_line(fb: &mut Framebuffer, rom: &GfxRom, palette: &PaletteRam, palette_base_row: usize, line: SpriteLineDraw) {
    let mut sprite_y = (line.sprite_y & 0x0f) as usize;
    if line.attr & 0x0002 != 0 {
        sprite_y ^= 0x0f;
    }
    let src = ((line.code as usize) << 7) + (sprite_y << 3);
    let words = [rom.read_u32(src), rom.read_u32(src + 4)];

    let zoom = line.zoom_x.min(FULL_ZOOM);
    let flag = usize::from(line.attr & 1 != 0) | (usize::from(line.opaque) << 1) | ((zoom as usize & 0x10) >> 2);
    let pal = palette_row(palette, palette_base_row + (line.attr >> 8) as usize);
    DRAWGFXLINE[flag](words, fb, Framebuffer::offset(line.x, line.y), &pal, zoom);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::TileSize;
    use crate::decode::RomLayout;
    use pretty_assertions::assert_eq;

    const BG: u16 = 0xdead;

    // Line 0 of tile 0 holds pens 0..=15 in pixel order; the rest is pen 15.
    fn ramp_rom() -> GfxRom {
        let mut rom = GfxRom::new(vec![0xff; 256]);
        // pixels 0..8: nibbles 0,2,4,6 -> pixels 0..4; 1,3,5,7 -> pixels 4..8
        let word = |base: u32| {
            let mut w = 0u32;
            for (nibble, &pixel) in INTERLEAVED_PIXEL.iter().enumerate() {
                w |= (base + pixel as u32) << (nibble * 4);
            }
            w
        };
        rom.as_mut_slice()[0..4].copy_from_slice(&word(0).to_le_bytes());
        rom.as_mut_slice()[4..8].copy_from_slice(&word(8).to_le_bytes());
        rom
    }

    fn identity_pal() -> [u16; 16] {
        std::array::from_fn(|i| 0x100 + i as u16)
    }

    fn row(fb: &Framebuffer, y: usize) -> Vec<u16> {
        (0..16).map(|x| fb.pixel(x, y).unwrap()).collect()
    }

    fn filled(height: usize) -> Framebuffer {
        let mut fb = Framebuffer::new(height);
        fb.fill(BG);
        fb
    }

    #[test]
    fn transparent_blit_skips_pen_15() {
        let rom = ramp_rom();
        let mut fb = filled(16);
        DRAWGFX16[0](&rom, 0, &mut fb, 0, &identity_pal(), 2);

        let mut expected: Vec<u16> = (0..15).map(|p| 0x100 + p).collect();
        expected.push(BG);
        assert_eq!(row(&fb, 0), expected);
        // line 1 is all pen 15
        assert_eq!(row(&fb, 1), vec![BG; 16]);
    }

    #[test]
    fn opaque_blit_draws_every_pen() {
        let rom = ramp_rom();
        let mut fb = filled(16);
        DRAWGFX16[blit16_index(TileClass::Opaque, 0)](&rom, 0, &mut fb, 0, &identity_pal(), 2);
        assert_eq!(row(&fb, 0), (0..16).map(|p| 0x100 + p).collect::<Vec<_>>());
        assert_eq!(row(&fb, 1), vec![0x10f; 16]);
    }

    #[test]
    fn flip_x_mirrors_and_flip_y_walks_up() {
        let rom = ramp_rom();
        let mut fb = filled(16);
        let index = blit16_index(TileClass::Opaque, 0x60);
        assert_eq!(index, 7);
        DRAWGFX16[index](&rom, 0, &mut fb, Framebuffer::offset(0, 5), &identity_pal(), 2);

        assert_eq!(row(&fb, 5), (0..16).rev().map(|p| 0x100 + p).collect::<Vec<_>>());
        assert_eq!(row(&fb, 4), vec![0x10f; 16]);
        assert_eq!(row(&fb, 6), vec![BG; 16]);
    }

    #[test]
    fn masked_blit_draws_only_selected_pens() {
        let rom = ramp_rom();
        let mut fb = filled(16);
        DRAWGFX16_MASKED[0](&rom, 0, &mut fb, 0, &identity_pal(), 1, 0b1000_0000_0000_0110);

        let mut expected = vec![BG; 16];
        expected[1] = 0x101;
        expected[2] = 0x102;
        expected[15] = 0x10f;
        assert_eq!(row(&fb, 0), expected);
    }

    #[test]
    fn writes_outside_the_buffer_are_dropped() {
        let rom = ramp_rom();
        let mut fb = filled(1);
        DRAWGFX16[1](&rom, 0, &mut fb, Framebuffer::offset(0, 0), &identity_pal(), 4);
        DRAWGFX16[1](&rom, 0, &mut fb, Framebuffer::offset(0, -3), &identity_pal(), 2);
        assert_eq!(fb.pixels().len(), BUF_WIDTH);
        assert_eq!(fb.pixel(0, 0), Some(0x100));
    }

    #[test]
    fn scroll2_clip_switches_path_at_sixteen_lines() {
        assert!(Scroll2Clip::new(16, 31).uses_hardware());
        assert!(!Scroll2Clip::new(16, 30).uses_hardware());
        assert_eq!(Scroll2Clip::new(100, 104).span(96), Some((100, 105)));
        assert_eq!(Scroll2Clip::new(100, 104).span(80), None);
    }

    fn scroll2_fixture() -> (GfxRom, PenUsage, PaletteRam) {
        // tile 1: line n is all pen (n & 0xe)
        let mut rom = GfxRom::new(vec![0xff; 256]);
        for line in 0..16 {
            let pen = (line & 0x0e) as u32;
            let word = pen * 0x1111_1111;
            let at = 128 + line * 8;
            rom.as_mut_slice()[at..at + 4].copy_from_slice(&word.to_le_bytes());
            rom.as_mut_slice()[at + 4..at + 8].copy_from_slice(&word.to_le_bytes());
        }
        let usage = PenUsage::scan(&rom, RomLayout::CPS_16, TileSize::X16, CPS_TRANSPARENT_PEN);
        let mut palette = PaletteRam::new(1, 3072);
        for pen in 0..16 {
            palette.write((SCROLL2_PALETTE_ROW + 2) * 16 + pen, 0x200 + pen as u16);
        }
        (rom, usage, palette)
    }

    #[test]
    fn scroll2_software_draws_clipped_band() {
        let (rom, usage, palette) = scroll2_fixture();
        let mut fb = filled(64);
        let clip = Scroll2Clip::new(20, 23);
        let tile = Scroll2Tile {
            x: 8,
            y: 16,
            code: 1,
            attr: 0x02,
            tpens: ALL_PENS,
        };
        assert!(draw_scroll2_tile(&mut fb, &rom, &usage, &palette, clip, tile));

        // lines 20..24 come from tile lines 4..8
        for (y, pen) in [(20, 4), (21, 4), (22, 6), (23, 6)] {
            assert_eq!(fb.pixel(8, y), Some(0x200 + pen), "line {y}");
        }
        assert_eq!(fb.pixel(8, 19), Some(BG));
        assert_eq!(fb.pixel(8, 24), Some(BG));
        assert_eq!(fb.pixel(7, 20), Some(BG));
    }

    #[test]
    fn scroll2_software_flip_y_reads_from_the_bottom() {
        let (rom, usage, palette) = scroll2_fixture();
        let mut fb = filled(64);
        let clip = Scroll2Clip::new(20, 23);
        let tile = Scroll2Tile {
            x: 0,
            y: 16,
            code: 1,
            attr: 0x42,
            tpens: ALL_PENS,
        };
        assert!(draw_scroll2_tile(&mut fb, &rom, &usage, &palette, clip, tile));

        // screen line r shows tile line 31 - r
        for (y, pen) in [(23, 8), (22, 8), (21, 10), (20, 10)] {
            assert_eq!(fb.pixel(0, y), Some(0x200 + pen), "line {y}");
        }
        assert_eq!(fb.pixel(0, 24), Some(BG));
    }

    #[test]
    fn scroll2_blank_tiles_are_skipped() {
        let (rom, usage, palette) = scroll2_fixture();
        let mut fb = filled(64);
        let tile = Scroll2Tile {
            x: 0,
            y: 16,
            code: 0,
            attr: 0,
            tpens: 0x0001,
        };
        assert!(!draw_scroll2_tile(&mut fb, &rom, &usage, &palette, Scroll2Clip::new(16, 20), tile));
        assert!(fb.pixels().iter().all(|&p| p == BG));
    }

    fn neo_fixture() -> (GfxRom, PaletteRam) {
        // tile 0, line 3: pixel i holds pen (i & 0xf), pixel 0 = pen 0
        let mut rom = GfxRom::zeroed(128);
        let word = |base: u32| {
            let mut w = 0u32;
            for (nibble, &pixel) in INTERLEAVED_PIXEL.iter().enumerate() {
                w |= (base + pixel as u32) << (nibble * 4);
            }
            w
        };
        rom.as_mut_slice()[24..28].copy_from_slice(&word(0).to_le_bytes());
        rom.as_mut_slice()[28..32].copy_from_slice(&word(8).to_le_bytes());
        let mut palette = PaletteRam::new(2, 4096);
        for pen in 0..16 {
            palette.write(0x0a * 16 + pen, 0x300 + pen as u16);
        }
        (rom, palette)
    }

    fn neo_line(zoom_x: u8, attr: u16, opaque: bool) -> SpriteLineDraw {
        SpriteLineDraw {
            x: 4,
            y: 2,
            zoom_x,
            sprite_y: 3,
            code: 0,
            attr,
            opaque,
        }
    }

    #[test]
    fn fixed_sprite_line_skips_pen_zero() {
        let (rom, palette) = neo_fixture();
        let mut fb = filled(8);
        draw_sprite_line(&mut fb, &rom, &palette, 0, neo_line(16, 0x0a00, false));

        assert_eq!(fb.pixel(4, 2), Some(BG));
        for x in 1..16 {
            assert_eq!(fb.pixel(4 + x, 2), Some(0x300 + x as u16));
        }
    }

    #[test]
    fn shrunk_sprite_line_packs_kept_pixels() {
        let (rom, palette) = neo_fixture();
        let mut fb = filled(8);
        draw_sprite_line(&mut fb, &rom, &palette, 0, neo_line(8, 0x0a00, true));

        let drawn: Vec<u16> = (4..12).map(|x| fb.pixel(x, 2).unwrap()).collect();
        assert_eq!(drawn, (0..16).step_by(2).map(|p| 0x300 + p).collect::<Vec<_>>());
        assert_eq!(fb.pixel(12, 2), Some(BG));
    }

    #[test]
    fn flipped_sprite_line_reverses_source() {
        let (rom, palette) = neo_fixture();
        let mut fb = filled(8);
        draw_sprite_line(&mut fb, &rom, &palette, 0, neo_line(16, 0x0a01, true));
        assert_eq!(fb.pixel(4, 2), Some(0x30f));
        assert_eq!(fb.pixel(19, 2), Some(0x300));
    }

    #[test]
    fn flip_y_reads_mirrored_source_line() {
        let (rom, palette) = neo_fixture();
        let mut fb = filled(8);
        // line 12 flipped is source line 3
        let mut line = neo_line(16, 0x0a02, true);
        line.sprite_y = 12;
        draw_sprite_line(&mut fb, &rom, &palette, 0, line);
        assert_eq!(fb.pixel(5, 2), Some(0x301));
    }
}
