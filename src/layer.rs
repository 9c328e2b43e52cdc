// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! One cached tile layer: sprite cache, staging atlas and draw buffer.
//!
//! A draw looks its key up in the cache. On a miss the layer sweeps stale
//! entries when the pool is about to run out, inserts the key, decodes the
//! tile into the slot the cache handed out and finally queues a quad. Tiles
//! that cannot get a slot this frame are dropped, never forced in.

use std::ops::RangeInclusive;

use log::{debug, warn};

use crate::atlas::{Atlas, BUF_WIDTH, PixelFormat, TileSize};
use crate::batch::{BatchKey, Flip, FlushStats, GroupedBatcher, LayerBatcher, OrderedBatcher, QuadPlacement, make_quad};
use crate::cache::{CacheError, SpriteCache};
use crate::config::{Batching, ClutLayout, LayerConfig, LayerId};
use crate::core::{GfxRom, PENS_PER_ROW, PaletteRam};
use crate::decode::{self, ALL_PENS, RomLayout};
use crate::driver::{CLUT_ENTRIES, ClutRef, DriverError, TextureInfo, TextureRef, VideoDriver};
use crate::key::{KeyLayout, SpriteKey};
use crate::priority::{DepthMode, PRIORITY_LANES, PriorityBatcher};

/// Palette rows a high-layer key can reference.
const HIGH_PALETTE_ROWS: usize = 32;

/// Counters kept per layer since creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayerStats {
    pub hits: u64,
    pub misses: u64,
    pub decodes: u64,
    pub sweeps: u64,
    pub evicted: u64,
    /// Entries removed by content invalidation.
    pub purged: u64,
    /// Draws that got no slot or no room in the draw buffer.
    pub dropped: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub runs: u64,
    pub quads: u64,
}

impl LayerStats {
    pub fn merge(&mut self, other: &LayerStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.decodes += other.decodes;
        self.sweeps += other.sweeps;
        self.evicted += other.evicted;
        self.purged += other.purged;
        self.dropped += other.dropped;
        self.flushes += other.flushes;
        self.failed_flushes += other.failed_flushes;
        self.runs += other.runs;
        self.quads += other.quads;
    }
}

/// Graphics data a draw decodes from.
#[derive(Clone, Copy, Debug)]
pub struct DrawSources<'a> {
    pub rom: &'a GfxRom,
    pub palette: &'a PaletteRam,
    /// Active palette bank; always 0 on CPS boards.
    pub palette_bank: usize,
}

/// One tile draw request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileDraw {
    pub x: i16,
    pub y: i16,
    pub code: u32,
    pub attr: u16,
    /// On-screen size; `None` draws the tile unscaled.
    pub size: Option<(i16, i16)>,
    pub z: i16,
    /// Pens kept by the pre-resolved decode.
    pub tpens: u16,
    pub lane: u8,
    /// CPS1 SCROLL1 graphics set.
    pub gfxset: Option<u16>,
}

impl TileDraw {
    pub const fn new(x: i16, y: i16, code: u32, attr: u16) -> Self {
        Self {
            x,
            y,
            code,
            attr,
            size: None,
            z: 0,
            tpens: ALL_PENS,
            lane: 0,
            gfxset: None,
        }
    }

    pub const fn scaled(mut self, width: i16, height: i16) -> Self {
        self.size = Some((width, height));
        self
    }

    pub const fn with_tpens(mut self, tpens: u16) -> Self {
        self.tpens = tpens;
        self
    }

    pub const fn with_priority(mut self, lane: u8, z: i16) -> Self {
        self.lane = lane;
        self.z = z;
        self
    }

    pub const fn with_gfxset(mut self, gfxset: u16) -> Self {
        self.gfxset = Some(gfxset);
        self
    }
}

#[derive(Clone, Debug)]
enum Submission {
    Batched(LayerBatcher),
    Lanes(PriorityBatcher),
}

#[derive(Clone, Debug)]
pub struct TileLayer {
    config: LayerConfig,
    clut: ClutLayout,
    cache: SpriteCache,
    atlas: Atlas,
    submission: Submission,
    stats: LayerStats,
    clear_pending: bool,
    /// Neo-Geo SPR: pool exhausted for the rest of the frame.
    disabled: bool,
    warned_full: bool,
    warned_overflow: bool,
}

impl TileLayer {
    pub fn new(config: LayerConfig, clut: ClutLayout) -> Result<Self, CacheError> {
        let cache = SpriteCache::new(config.buckets, config.capacity())?;
        let atlas = Atlas::new(config.geometry(), config.format);
        let submission = match config.batching {
            Batching::Ordered => Submission::Batched(LayerBatcher::Ordered(OrderedBatcher::new(config.max_quads))),
            Batching::GroupByBank => Submission::Batched(LayerBatcher::Grouped(GroupedBatcher::new(config.max_quads))),
            Batching::PriorityLanes => Submission::Lanes(PriorityBatcher::new(config.max_quads)),
        };
        debug!(
            "{}: {} slots of {}px, {} buckets",
            config.id,
            cache.capacity(),
            config.tile.pixels(),
            config.buckets
        );
        Ok(Self {
            config,
            clut,
            cache,
            atlas,
            submission,
            stats: LayerStats::default(),
            clear_pending: false,
            disabled: false,
            warned_full: false,
            warned_overflow: false,
        })
    }

    pub fn id(&self) -> LayerId {
        self.config.id
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn cache(&self) -> &SpriteCache {
        &self.cache
    }

    pub fn atlas(&self) -> &Atlas {
        &self.atlas
    }

    pub fn stats(&self) -> &LayerStats {
        &self.stats
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Texture pages the driver must provide for this layer.
    pub fn textures(&self) -> Vec<TextureInfo> {
        (0..self.config.pages)
            .map(|page| TextureInfo {
                texture: TextureRef::new(self.config.id, page as u8),
                width: BUF_WIDTH,
                height: self.config.height,
                format: self.config.format,
            })
            .collect()
    }

    /// Drop the whole cache at the next frame start.
    pub fn request_clear(&mut self) {
        self.clear_pending = true;
    }

    pub fn is_clear_pending(&self) -> bool {
        self.clear_pending
    }

    /// Drop the whole cache now.
    pub fn reset(&mut self) {
        self.cache.reset();
        self.clear_pending = false;
        debug!("{}: cache reset", self.config.id);
    }

    pub fn begin_frame(&mut self, generation: u32) {
        if self.clear_pending {
            self.reset();
        }
        self.cache.set_generation(generation);
        self.disabled = false;
        self.warned_full = false;
        self.warned_overflow = false;
    }

    /// Re-mark a resident tile as used this frame without drawing it.
    pub fn touch(&mut self, code: u32, attr: u16) -> bool {
        self.cache.get(self.config.key.make(code, attr)).is_some()
    }

    /// Quads waiting for the next flush.
    pub fn pending(&self) -> usize {
        match &self.submission {
            Submission::Batched(b) => b.quads(),
            Submission::Lanes(l) => l.quads(),
        }
    }

    fn flip_of(&self, attr: u16) -> Flip {
        match self.config.key {
            KeyLayout::NeoFix | KeyLayout::NeoSprite => Flip::from_neo_attr(attr),
            KeyLayout::Base | KeyLayout::High => Flip::from_cps_attr(attr),
        }
    }

    /// Palette bank nibble folded into indexed texels.
    fn bank_of(&self, attr: u16) -> u8 {
        match self.config.key {
            KeyLayout::NeoSprite => ((attr >> 8) & 0x0f) as u8,
            _ => (attr & 0x0f) as u8,
        }
    }

    /// CLUT window an indexed quad is resolved through.
    pub fn clut_for(&self, attr: u16, palette_bank: usize) -> Option<ClutRef> {
        if self.config.format == PixelFormat::Direct {
            return None;
        }
        let offset = match self.config.key {
            KeyLayout::NeoSprite => ((attr >> 12) as usize) * CLUT_ENTRIES,
            KeyLayout::NeoFix => self.config.clut_base_row * PENS_PER_ROW,
            KeyLayout::Base | KeyLayout::High => {
                let high = if attr & 0x10 != 0 { 16 } else { 0 };
                (self.config.clut_base_row + high) * PENS_PER_ROW
            }
        };
        let base = palette_bank * self.clut.colors_per_bank;
        Some(ClutRef::at(base + offset, self.clut.colors_per_bank))
    }

    fn sweep(&mut self) {
        self.stats.sweeps += 1;
        match self.cache.evict_stale() {
            Ok(freed) => {
                self.stats.evicted += freed as u64;
                debug!("{}: swept {freed} stale entries", self.config.id);
            }
            Err(CacheError::NothingStale) => debug!("{}: sweep found nothing stale", self.config.id),
            Err(err) => warn!("{}: sweep failed: {err}", self.config.id),
        }
    }

    fn acquire(&mut self, key: SpriteKey, src: &DrawSources<'_>, draw: &TileDraw) -> Option<usize> {
        if let Some(slot) = self.cache.get(key) {
            self.stats.hits += 1;
            return Some(slot);
        }
        self.stats.misses += 1;

        if self.cache.needs_sweep() {
            self.sweep();
            if self.config.key == KeyLayout::NeoSprite && self.cache.needs_sweep() {
                warn!("{}: texture pool exhausted, sprites disabled for this frame", self.config.id);
                self.disabled = true;
                self.stats.dropped += 1;
                return None;
            }
        }

        let slot = match self.cache.insert(key) {
            Ok(slot) => slot,
            Err(err) => {
                if !self.warned_full {
                    warn!("{}: dropping tile {key}: {err}", self.config.id);
                    self.warned_full = true;
                }
                self.stats.dropped += 1;
                return None;
            }
        };
        self.decode(slot, src, draw);
        Some(slot)
    }

    fn decode(&mut self, slot: usize, src: &DrawSources<'_>, draw: &TileDraw) {
        let layout = match draw.gfxset {
            Some(gfxset) => RomLayout::cps1_8(gfxset),
            None => self.config.rom,
        };
        let written = match self.config.format {
            PixelFormat::Indexed => {
                let bank = self.bank_of(draw.attr);
                self.atlas
                    .indexed_tile_mut(slot)
                    .map(|mut tile| decode::decode_indexed(src.rom, layout, draw.code, bank, &mut tile))
            }
            PixelFormat::Direct => {
                let row = (draw.attr & 0x1f) as usize + self.config.clut_base_row;
                let colors = src.palette.row(row).unwrap_or(&[]);
                let pal = decode::masked_palette(colors, draw.tpens);
                self.atlas
                    .direct_tile_mut(slot)
                    .map(|mut tile| decode::decode_resolved(src.rom, layout, draw.code, &pal, &mut tile))
            }
        };
        if written.is_some() {
            self.stats.decodes += 1;
        }
    }

    /// Look up or decode the tile and queue its quad. Returns `false` if
    /// the draw was dropped.
    pub fn draw(&mut self, src: &DrawSources<'_>, draw: TileDraw) -> bool {
        if self.disabled {
            return false;
        }
        let key = self.config.key.make(draw.code, draw.attr);
        let Some(slot) = self.acquire(key, src, &draw) else {
            return false;
        };
        let geometry = self.atlas.geometry();
        let Some((u, v)) = geometry.texel_origin(slot) else {
            return false;
        };
        let page = slot / geometry.tiles_per_page();

        let size = self.config.tile.pixels() as i16;
        let (width, height) = draw.size.unwrap_or((size, size));
        let place = QuadPlacement {
            x: draw.x,
            y: draw.y,
            width,
            height,
            z: draw.z,
        };
        let quad = make_quad(u as u16, v as u16, size as u16, place, self.flip_of(draw.attr));
        let key = BatchKey {
            page: page as u8,
            clut: self.clut_for(draw.attr, src.palette_bank),
        };

        let accepted = match &mut self.submission {
            Submission::Batched(batcher) => batcher.submit(quad, key),
            Submission::Lanes(lanes) => lanes.submit(draw.lane as usize, quad, key),
        };
        if !accepted {
            if !self.warned_overflow {
                warn!("{}: draw buffer full, dropping quads", self.config.id);
                self.warned_overflow = true;
            }
            self.stats.dropped += 1;
        }
        accepted
    }

    /// Purge entries baked with a palette row marked dirty.
    ///
    /// Only layers whose key embeds a palette row are affected; the window
    /// starts at the layer's CLUT base row.
    pub fn purge_dirty_palette(&mut self, palette: &PaletteRam) -> usize {
        let layout = self.config.key;
        if layout != KeyLayout::High {
            return 0;
        }
        let base = self.config.clut_base_row;
        let dirty = palette.dirty_in(base..base + HIGH_PALETTE_ROWS);
        if dirty.is_empty() {
            return 0;
        }
        let purged = self
            .cache
            .invalidate_by(|key| layout.palette_of(key).is_some_and(|row| dirty.contains(&(row as usize))));
        self.stats.purged += purged as u64;
        debug!("{}: purged {purged} entries for dirty palette rows {dirty:?}", self.config.id);
        purged
    }

    /// Purge high-layer entries decoded for transparency `group`.
    pub fn purge_transparency_group(&mut self, group: u32) -> usize {
        if self.config.key != KeyLayout::High {
            return 0;
        }
        let purged = self.cache.invalidate_by(|key| key.high_pen_group() == group);
        self.stats.purged += purged as u64;
        debug!("{}: purged {purged} entries of transparency group {group}", self.config.id);
        purged
    }

    /// Re-shape the layer for a new tile size and source. The cache and
    /// atlas are rebuilt empty; the texture size does not change.
    pub fn retarget(&mut self, tile: TileSize, rom: RomLayout, clut_base_row: usize) -> Result<(), CacheError> {
        let mut config = self.config;
        config.tile = tile;
        config.rom = rom;
        config.clut_base_row = clut_base_row;

        let mut cache = SpriteCache::new(config.buckets, config.capacity())?;
        cache.set_generation(self.cache.generation());
        self.cache = cache;
        self.atlas = Atlas::new(config.geometry(), config.format);
        self.config = config;
        self.clear_pending = false;
        debug!(
            "{}: retargeted to {}px tiles, {} slots",
            config.id,
            tile.pixels(),
            self.cache.capacity()
        );
        Ok(())
    }

    fn upload_dirty<D>(&mut self, driver: &mut D) -> Result<(), DriverError>
    where
        D: VideoDriver + ?Sized,
    {
        if !self.atlas.is_dirty() {
            return Ok(());
        }
        for region in self.atlas.dirty_regions() {
            let texture = TextureRef::new(self.config.id, region.page as u8);
            driver.upload_texture(texture, region, self.atlas.region_texels(region))?;
        }
        self.atlas.clear_dirty();
        Ok(())
    }

    fn record(&mut self, result: Result<FlushStats, DriverError>) -> FlushStats {
        match result {
            Ok(stats) => {
                self.stats.flushes += 1;
                self.stats.runs += stats.runs as u64;
                self.stats.quads += stats.quads as u64;
                stats
            }
            Err(err) => {
                warn!("{}: flush skipped: {err}", self.config.id);
                self.stats.failed_flushes += 1;
                FlushStats::default()
            }
        }
    }

    /// Upload dirty atlas lines and draw every queued quad.
    ///
    /// Driver failures skip the flush and drop the queued quads; dirty
    /// marks are kept so the next flush uploads them again.
    pub fn flush<D>(&mut self, driver: &mut D, palette: &PaletteRam) -> FlushStats
    where
        D: VideoDriver + ?Sized,
    {
        let stats = self.flush_lanes(driver, palette, 0..=PRIORITY_LANES - 1, DepthMode::Off);
        if let Submission::Lanes(lanes) = &mut self.submission {
            lanes.clear();
        }
        stats
    }

    /// Flush priority `lanes` (all quads for non-lane layers). Lane
    /// buffers are kept until [`TileLayer::clear_batch`].
    pub fn flush_lanes<D>(
        &mut self,
        driver: &mut D,
        palette: &PaletteRam,
        lanes: RangeInclusive<usize>,
        depth: DepthMode,
    ) -> FlushStats
    where
        D: VideoDriver + ?Sized,
    {
        if self.pending() == 0 {
            return FlushStats::default();
        }
        if let Err(err) = self.upload_dirty(driver) {
            warn!("{}: atlas upload failed: {err}", self.config.id);
            self.stats.failed_flushes += 1;
            self.clear_batch();
            return FlushStats::default();
        }

        let id = self.config.id;
        let mask_key = BatchKey {
            page: 0,
            clut: self.clut_for(0, 0),
        };
        let result = match &mut self.submission {
            Submission::Batched(batcher) => batcher.flush(driver, id, palette),
            Submission::Lanes(batcher) => batcher.flush(driver, id, palette, lanes, depth, mask_key),
        };
        self.record(result)
    }

    pub fn clear_batch(&mut self) {
        match &mut self.submission {
            Submission::Batched(b) => b.clear(),
            Submission::Lanes(l) => l.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoConfig;
    use crate::driver::{DriverCall, RecordingDriver, register_textures};
    use pretty_assertions::assert_eq;

    fn small(mut config: LayerConfig, height: usize) -> LayerConfig {
        config.height = height;
        config
    }

    fn cps1_layer(id: LayerId) -> TileLayer {
        let config = *VideoConfig::cps1().layer(id).unwrap();
        TileLayer::new(config, ClutLayout::CPS).unwrap()
    }

    fn fixture() -> (GfxRom, PaletteRam) {
        let mut rom = GfxRom::new(vec![0x21; 128 * 64]);
        // scroll1 tile 1, gfxset 1 half of line 0
        rom.as_mut_slice()[64 + 4..64 + 8].copy_from_slice(&0x7777_7777u32.to_le_bytes());
        (rom, PaletteRam::new(1, 3072))
    }

    fn driver_for(layer: &TileLayer) -> RecordingDriver {
        let mut driver = RecordingDriver::new();
        register_textures(&mut driver, &layer.textures()).unwrap();
        driver.take_calls();
        driver
    }

    #[test]
    fn repeated_key_decodes_once() {
        let (rom, palette) = fixture();
        let src = DrawSources {
            rom: &rom,
            palette: &palette,
            palette_bank: 0,
        };
        let mut layer = cps1_layer(LayerId::Object);
        layer.begin_frame(1);

        assert!(layer.draw(&src, TileDraw::new(0, 0, 5, 0x03)));
        assert!(layer.draw(&src, TileDraw::new(32, 0, 5, 0x23)));
        assert!(layer.draw(&src, TileDraw::new(64, 0, 6, 0x03)));

        let stats = layer.stats();
        assert_eq!((stats.hits, stats.misses, stats.decodes), (1, 2, 2));
        assert_eq!(layer.pending(), 3);
        assert_eq!(layer.cache().peek(SpriteKey::base(5, 0x03)), Some(0));
    }

    #[test]
    fn flush_uploads_once_then_blits_in_order() {
        let (rom, palette) = fixture();
        let src = DrawSources {
            rom: &rom,
            palette: &palette,
            palette_bank: 0,
        };
        let mut layer = cps1_layer(LayerId::Object);
        let mut driver = driver_for(&layer);

        layer.begin_frame(1);
        layer.draw(&src, TileDraw::new(0, 0, 1, 0x00));
        layer.draw(&src, TileDraw::new(0, 0, 2, 0x10));
        let stats = layer.flush(&mut driver, &palette);
        assert_eq!(layer.pending(), 0);

        let uploads = driver
            .calls
            .iter()
            .filter(|c| matches!(c, DriverCall::UploadTexture { .. }))
            .count();
        assert_eq!(uploads, 1);
        let cluts: Vec<_> = driver.blits().map(|(_, clut, _)| clut.map(|c| c.offset)).collect();
        assert_eq!(cluts, vec![Some(0), Some(256)]);
        assert_eq!(layer.stats().runs, 2);
        assert_eq!(stats, FlushStats { runs: 2, quads: 2 });

        // nothing new decoded: no upload on the next frame
        driver.take_calls();
        layer.begin_frame(2);
        layer.draw(&src, TileDraw::new(0, 0, 1, 0x00));
        layer.flush(&mut driver, &palette);
        assert!(!driver.calls.iter().any(|c| matches!(c, DriverCall::UploadTexture { .. })));
    }

    #[test]
    fn pool_exhaustion_drops_then_recovers_next_frame() {
        let (rom, palette) = fixture();
        let src = DrawSources {
            rom: &rom,
            palette: &palette,
            palette_bank: 0,
        };
        let config = small(*VideoConfig::cps1().layer(LayerId::Object).unwrap(), 16);
        let mut layer = TileLayer::new(config, ClutLayout::CPS).unwrap();
        assert_eq!(layer.cache().capacity(), 32);

        layer.begin_frame(1);
        for code in 0..32 {
            assert!(layer.draw(&src, TileDraw::new(0, 0, code, 0)));
        }
        assert!(!layer.draw(&src, TileDraw::new(0, 0, 32, 0)));
        assert_eq!(layer.stats().dropped, 1);
        assert_eq!(layer.stats().decodes, 32);

        layer.clear_batch();
        layer.begin_frame(2);
        assert!(layer.draw(&src, TileDraw::new(0, 0, 32, 0)));
        assert_eq!(layer.stats().evicted, 32);
        assert_eq!(layer.cache().len(), 1);
    }

    #[test]
    fn touched_tiles_survive_the_sweep() {
        let (rom, palette) = fixture();
        let src = DrawSources {
            rom: &rom,
            palette: &palette,
            palette_bank: 0,
        };
        let config = small(*VideoConfig::cps1().layer(LayerId::Object).unwrap(), 16);
        let mut layer = TileLayer::new(config, ClutLayout::CPS).unwrap();

        layer.begin_frame(1);
        for code in 0..31 {
            layer.draw(&src, TileDraw::new(0, 0, code, 0));
        }
        layer.begin_frame(2);
        assert!(layer.touch(7, 0));
        assert!(!layer.touch(99, 0));
        // pool at capacity - 1: this miss sweeps everything but tile 7
        layer.draw(&src, TileDraw::new(0, 0, 40, 0));
        assert_eq!(layer.cache().peek(SpriteKey::base(7, 0)), Some(7));
        assert_eq!(layer.cache().len(), 2);
    }

    #[test]
    fn neo_sprites_disable_when_sweep_frees_nothing() {
        let (rom, palette) = fixture();
        let src = DrawSources {
            rom: &rom,
            palette: &palette,
            palette_bank: 0,
        };
        let mut config = small(*VideoConfig::neogeo_mvs().layer(LayerId::Sprite).unwrap(), 16);
        config.pages = 1;
        let mut layer = TileLayer::new(config, ClutLayout::NEOGEO).unwrap();

        layer.begin_frame(1);
        for code in 0..31 {
            assert!(layer.draw(&src, TileDraw::new(0, 0, code, 0)));
        }
        assert!(!layer.draw(&src, TileDraw::new(0, 0, 31, 0)));
        assert!(layer.is_disabled());
        // even resident tiles are refused until the next frame
        assert!(!layer.draw(&src, TileDraw::new(0, 0, 0, 0)));

        layer.begin_frame(2);
        assert!(!layer.is_disabled());
        assert!(layer.draw(&src, TileDraw::new(0, 0, 0, 0)));
    }

    #[test]
    fn clut_windows_follow_layer_and_attr() {
        let object = cps1_layer(LayerId::Object);
        assert_eq!(object.clut_for(0x13, 0), Some(ClutRef::at(256, 3072)));
        let scroll3 = cps1_layer(LayerId::Scroll3);
        assert_eq!(scroll3.clut_for(0x01, 0), Some(ClutRef::at(96 * 16, 3072)));
        assert_eq!(cps1_layer(LayerId::ScrollHigh).clut_for(0x01, 0), None);

        let config = *VideoConfig::neogeo_cd().layer(LayerId::Sprite).unwrap();
        let sprite = TileLayer::new(config, ClutLayout::NEOGEO).unwrap();
        let clut = sprite.clut_for(0x5a00, 1).unwrap();
        assert_eq!(clut.offset, 4096 + 5 * 256);
        assert_eq!(clut.bank, 1);
        assert_eq!(sprite.bank_of(0x5a00), 0x0a);
    }

    #[test]
    fn neo_sprite_pages_and_scaled_quads() {
        let (rom, palette) = fixture();
        let src = DrawSources {
            rom: &rom,
            palette: &palette,
            palette_bank: 0,
        };
        let config = *VideoConfig::neogeo_mvs().layer(LayerId::Sprite).unwrap();
        let mut layer = TileLayer::new(config, ClutLayout::NEOGEO).unwrap();
        let mut driver = driver_for(&layer);
        assert_eq!(driver.textures().len(), 3);

        layer.begin_frame(1);
        for code in 0..1025 {
            layer.draw(&src, TileDraw::new(0, 0, code, 0x0001).scaled(9, 12));
        }
        layer.flush(&mut driver, &palette);

        let pages: Vec<u8> = driver.blits().map(|(t, _, _)| t.page).collect();
        assert_eq!(pages, vec![0, 1]);
        let (_, _, vertices) = driver.blits().last().unwrap();
        // slot 1024 is the first tile of page 1, flipped in x
        assert_eq!((vertices[0].u, vertices[1].u, vertices[0].v), (16, 0, 0));
        assert_eq!((vertices[1].x, vertices[1].y), (9, 12));
    }

    #[test]
    fn failed_upload_skips_flush_and_retries() {
        let (rom, palette) = fixture();
        let src = DrawSources {
            rom: &rom,
            palette: &palette,
            palette_bank: 0,
        };
        let mut layer = cps1_layer(LayerId::Scroll2);
        let mut driver = driver_for(&layer);
        driver.fail_uploads = true;

        layer.begin_frame(1);
        layer.draw(&src, TileDraw::new(0, 0, 3, 0));
        layer.flush(&mut driver, &palette);
        assert_eq!(driver.blits().count(), 0);
        assert_eq!(layer.stats().failed_flushes, 1);
        assert_eq!(layer.pending(), 0);
        assert!(layer.atlas().is_dirty());

        driver.fail_uploads = false;
        layer.draw(&src, TileDraw::new(0, 0, 3, 0));
        layer.flush(&mut driver, &palette);
        assert_eq!(driver.blits().count(), 1);
        assert!(!layer.atlas().is_dirty());
    }

    #[test]
    fn gfxset_selects_scroll1_half() {
        let (rom, palette) = fixture();
        let src = DrawSources {
            rom: &rom,
            palette: &palette,
            palette_bank: 0,
        };
        let mut layer = cps1_layer(LayerId::Scroll1);
        layer.begin_frame(1);
        layer.draw(&src, TileDraw::new(0, 0, 1, 0x02).with_gfxset(1));

        let crate::atlas::TexelSlice::Indexed(page) = layer.atlas().page_texels(0) else {
            panic!("scroll1 atlas is indexed");
        };
        assert_eq!(&page[..8], &[0x27; 8]);
    }

    #[test]
    fn high_layer_purges_dirty_palette_rows_only() {
        let (rom, mut palette) = fixture();
        let mut layer = cps1_layer(LayerId::ScrollHigh);
        layer.begin_frame(1);
        {
            let src = DrawSources {
                rom: &rom,
                palette: &palette,
                palette_bank: 0,
            };
            layer.draw(&src, TileDraw::new(0, 0, 10, 0x0005).with_tpens(0x00ff));
            layer.draw(&src, TileDraw::new(8, 0, 11, 0x0006).with_tpens(0x00ff));
        }
        let kept = layer.cache().peek(SpriteKey::high(11, 0x0006));

        palette.mark_row_dirty(32 + 5);
        assert_eq!(layer.purge_dirty_palette(&palette), 1);
        assert_eq!(layer.cache().peek(SpriteKey::high(10, 0x0005)), None);
        assert_eq!(layer.cache().peek(SpriteKey::high(11, 0x0006)), kept);

        // base-key layers ignore palette writes
        let mut object = cps1_layer(LayerId::Object);
        assert_eq!(object.purge_dirty_palette(&palette), 0);
    }

    #[test]
    fn high_layer_group_purge_and_retarget() {
        let (rom, palette) = fixture();
        let src = DrawSources {
            rom: &rom,
            palette: &palette,
            palette_bank: 0,
        };
        let mut layer = cps1_layer(LayerId::ScrollHigh);
        layer.begin_frame(3);
        layer.draw(&src, TileDraw::new(0, 0, 1, 0x0080));
        layer.draw(&src, TileDraw::new(0, 0, 2, 0x0100));
        assert_eq!(layer.purge_transparency_group(1), 1);
        assert_eq!(layer.cache().len(), 1);

        layer.retarget(TileSize::X16, RomLayout::CPS_16, 64).unwrap();
        assert!(layer.cache().is_empty());
        assert_eq!(layer.cache().capacity(), 32 * 12);
        assert_eq!(layer.cache().generation(), 3);
        assert_eq!(layer.textures()[0].height, 192);
    }

    #[test]
    fn deferred_clear_waits_for_frame_start() {
        let (rom, palette) = fixture();
        let src = DrawSources {
            rom: &rom,
            palette: &palette,
            palette_bank: 0,
        };
        let mut layer = cps1_layer(LayerId::Scroll3);
        layer.begin_frame(1);
        layer.draw(&src, TileDraw::new(0, 0, 1, 0));
        layer.request_clear();
        assert_eq!(layer.cache().len(), 1);
        layer.begin_frame(2);
        assert!(layer.cache().is_empty());
        assert!(!layer.is_clear_pending());
    }
}
