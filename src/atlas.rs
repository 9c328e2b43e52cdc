// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! CPU staging atlas for decoded tiles.
//!
//! An atlas is one or more texture pages of `BUF_WIDTH` texels per line,
//! cut into a grid of equally sized tiles. Slot `n` lives at column
//! `n % tiles_per_row` and row `n / tiles_per_row` of page
//! `n / tiles_per_page`. Decoding a tile marks its slot dirty; the flush path
//! uploads only the line range covering dirty slots.

use bitvec::prelude::*;

/// Texels per atlas line.
pub const BUF_WIDTH: usize = 512;
/// Lines per atlas page.
pub const TEXTURE_HEIGHT: usize = 512;

/// Square tile edge length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-config", serde(try_from = "u32", into = "u32"))]
pub enum TileSize {
    X8,
    X16,
    X32,
}

impl TryFrom<u32> for TileSize {
    type Error = String;

    fn try_from(pixels: u32) -> Result<Self, Self::Error> {
        match pixels {
            8 => Ok(TileSize::X8),
            16 => Ok(TileSize::X16),
            32 => Ok(TileSize::X32),
            other => Err(format!("unsupported tile size {other}")),
        }
    }
}

impl From<TileSize> for u32 {
    fn from(size: TileSize) -> Self {
        size.pixels() as u32
    }
}

impl TileSize {
    pub const fn pixels(self) -> usize {
        match self {
            TileSize::X8 => 8,
            TileSize::X16 => 16,
            TileSize::X32 => 32,
        }
    }

    /// 32-bit ROM words per tile line.
    pub const fn words_per_line(self) -> usize {
        self.pixels() / 8
    }
}

/// Texel representation stored in the atlas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-config", serde(rename_all = "snake_case"))]
pub enum PixelFormat {
    /// One byte per texel, pen in the low nibble and bank in the high nibble.
    Indexed,
    /// One 16-bit colour per texel, palette already applied.
    Direct,
}

/// Page dimensions and tile grid of an atlas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtlasGeometry {
    pub tile: TileSize,
    pub width: usize,
    pub height: usize,
    pub pages: usize,
}

/// Where a slot lives inside the atlas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileLocation {
    pub page: usize,
    pub column: usize,
    pub row: usize,
}

impl AtlasGeometry {
    pub const fn new(tile: TileSize, width: usize, height: usize, pages: usize) -> Self {
        Self {
            tile,
            width,
            height,
            pages,
        }
    }

    /// One `BUF_WIDTH` x `height` page.
    pub const fn single(tile: TileSize, height: usize) -> Self {
        Self::new(tile, BUF_WIDTH, height, 1)
    }

    pub const fn tiles_per_row(&self) -> usize {
        self.width / self.tile.pixels()
    }

    pub const fn rows_per_page(&self) -> usize {
        self.height / self.tile.pixels()
    }

    pub const fn tiles_per_page(&self) -> usize {
        self.tiles_per_row() * self.rows_per_page()
    }

    pub const fn capacity(&self) -> usize {
        self.tiles_per_page() * self.pages
    }

    pub const fn page_texels(&self) -> usize {
        self.width * self.height
    }

    pub fn locate(&self, slot: usize) -> Option<TileLocation> {
        if slot >= self.capacity() {
            return None;
        }
        let per_page = self.tiles_per_page();
        let within = slot % per_page;
        Some(TileLocation {
            page: slot / per_page,
            column: within % self.tiles_per_row(),
            row: within / self.tiles_per_row(),
        })
    }

    /// Texel coordinate of a slot's top-left corner within its page.
    pub fn texel_origin(&self, slot: usize) -> Option<(usize, usize)> {
        let loc = self.locate(slot)?;
        let size = self.tile.pixels();
        Some((loc.column * size, loc.row * size))
    }

    fn texel_offset(&self, slot: usize) -> Option<usize> {
        let loc = self.locate(slot)?;
        let size = self.tile.pixels();
        Some(loc.page * self.page_texels() + loc.row * size * self.width + loc.column * size)
    }
}

/// Line range of one page that needs uploading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtlasRegion {
    pub page: usize,
    pub first_line: usize,
    pub lines: usize,
}

/// Borrowed texels handed to the driver on upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TexelSlice<'a> {
    Indexed(&'a [u8]),
    Direct(&'a [u16]),
}

impl TexelSlice<'_> {
    pub fn len(&self) -> usize {
        match self {
            TexelSlice::Indexed(t) => t.len(),
            TexelSlice::Direct(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug)]
enum Texels {
    Indexed(Vec<u8>),
    Direct(Vec<u16>),
}

/// Writable view of one tile inside the atlas.
pub struct TileMut<'a, T> {
    texels: &'a mut [T],
    stride: usize,
    size: usize,
}

impl<T> TileMut<'_, T> {
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tile lines from top to bottom, each `size` texels long.
    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [T]> {
        let size = self.size;
        self.texels
            .chunks_mut(self.stride)
            .take(size)
            .map(move |line| &mut line[..size])
    }
}

#[derive(Clone, Debug)]
pub struct Atlas {
    geometry: AtlasGeometry,
    texels: Texels,
    dirty: BitVec,
}

impl Atlas {
    pub fn new(geometry: AtlasGeometry, format: PixelFormat) -> Self {
        let len = geometry.page_texels() * geometry.pages;
        let texels = match format {
            PixelFormat::Indexed => Texels::Indexed(vec![0; len]),
            PixelFormat::Direct => Texels::Direct(vec![0; len]),
        };
        Self {
            geometry,
            texels,
            dirty: bitvec![0; geometry.capacity()],
        }
    }

    pub fn geometry(&self) -> &AtlasGeometry {
        &self.geometry
    }

    pub fn format(&self) -> PixelFormat {
        match self.texels {
            Texels::Indexed(_) => PixelFormat::Indexed,
            Texels::Direct(_) => PixelFormat::Direct,
        }
    }

    /// Indexed view of `slot`, marking it dirty. `None` for direct atlases
    /// or slots past capacity.
    pub fn indexed_tile_mut(&mut self, slot: usize) -> Option<TileMut<'_, u8>> {
        let offset = self.geometry.texel_offset(slot)?;
        let Texels::Indexed(texels) = &mut self.texels else {
            return None;
        };
        self.dirty.set(slot, true);
        Some(TileMut {
            texels: &mut texels[offset..],
            stride: self.geometry.width,
            size: self.geometry.tile.pixels(),
        })
    }

    /// Direct-colour view of `slot`, marking it dirty.
    pub fn direct_tile_mut(&mut self, slot: usize) -> Option<TileMut<'_, u16>> {
        let offset = self.geometry.texel_offset(slot)?;
        let Texels::Direct(texels) = &mut self.texels else {
            return None;
        };
        self.dirty.set(slot, true);
        Some(TileMut {
            texels: &mut texels[offset..],
            stride: self.geometry.width,
            size: self.geometry.tile.pixels(),
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.any()
    }

    pub fn is_slot_dirty(&self, slot: usize) -> bool {
        self.dirty.get(slot).is_some_and(|bit| *bit)
    }

    /// Per page, the smallest line span covering every dirty slot.
    pub fn dirty_regions(&self) -> Vec<AtlasRegion> {
        let per_page = self.geometry.tiles_per_page();
        let per_row = self.geometry.tiles_per_row();
        let size = self.geometry.tile.pixels();

        let mut regions: Vec<AtlasRegion> = Vec::new();
        for slot in self.dirty.iter_ones() {
            let page = slot / per_page;
            let row = (slot % per_page) / per_row;
            match regions.last_mut() {
                Some(region) if region.page == page => {
                    let end = (row + 1) * size;
                    region.lines = end - region.first_line;
                }
                _ => regions.push(AtlasRegion {
                    page,
                    first_line: row * size,
                    lines: size,
                }),
            }
        }
        regions
    }

    /// Texels covered by `region`, full page width.
    pub fn region_texels(&self, region: AtlasRegion) -> TexelSlice<'_> {
        let start = region.page * self.geometry.page_texels() + region.first_line * self.geometry.width;
        let end = start + region.lines * self.geometry.width;
        match &self.texels {
            Texels::Indexed(t) => TexelSlice::Indexed(&t[start.min(t.len())..end.min(t.len())]),
            Texels::Direct(t) => TexelSlice::Direct(&t[start.min(t.len())..end.min(t.len())]),
        }
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.fill(false);
    }

    /// Whole-page texels, for drivers that upload full pages.
    pub fn page_texels(&self, page: usize) -> TexelSlice<'_> {
        self.region_texels(AtlasRegion {
            page,
            first_line: 0,
            lines: self.geometry.height,
        })
    }
}
