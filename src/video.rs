// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-frame video coordinator for one chipset.
//!
//! [`VideoCore`] owns every cached layer of a chipset, the palette RAM and
//! the software framebuffer, and drives them through the frame cycle:
//! `begin_frame` → draws → per-layer flushes → `end_frame`. The caches are a
//! derived view of ROM and palette; loading a save state simply drops them.

use std::ops::RangeInclusive;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::batch::FlushStats;
use crate::cache::CacheError;
use crate::config::{Batching, Chipset, ConfigError, LayerId, VideoConfig};
use crate::core::{GfxRom, PENS_PER_ROW, PaletteRam};
use crate::decode::{ALL_PENS, PenUsage};
use crate::driver::{DriverError, Rect, TextureInfo, VideoDriver, register_textures};
use crate::layer::{DrawSources, LayerStats, TileDraw, TileLayer};
use crate::priority::DepthMode;
use crate::software::{self, Framebuffer, Scroll2Clip, Scroll2Tile, SpriteLineDraw};

/// First visible line of the CPS and Neo-Geo screens.
pub const FIRST_VISIBLE_LINE: i32 = 16;
/// Last visible line.
pub const LAST_VISIBLE_LINE: i32 = 239;

/// Scissor restored after a clipped flush.
const SCREEN_SCISSOR: Rect = Rect::new(64, 16, 448, 240);

#[derive(Debug, Error)]
pub enum VideoError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("layer {0} is not part of this chipset")]
    UnknownLayer(LayerId),
}

struct LayerSlot {
    layer: TileLayer,
    rom: Arc<GfxRom>,
    /// Pen usage for layers with a software path.
    pen_usage: Option<PenUsage>,
}

pub struct VideoCore<D: VideoDriver> {
    pub driver: D,
    config: VideoConfig,
    slots: Vec<LayerSlot>,
    pub palette: PaletteRam,
    pub framebuffer: Framebuffer,
    /// Palette bank selected by the game (Neo-Geo).
    pub palette_bank: usize,

    generation: u32,
    pub frame_count: u64,
    clip_min_y: i32,
    clip_max_y: i32,
    scroll2_clip: Scroll2Clip,
    high_owner: Option<LayerId>,
}

impl<D: VideoDriver> VideoCore<D> {
    /// Validate `config`, build every layer and register its textures.
    pub fn new(config: VideoConfig, mut driver: D) -> Result<Self, VideoError> {
        config.validate()?;

        let empty = Arc::new(GfxRom::default());
        let mut slots = Vec::with_capacity(config.layers.len());
        for layer_config in &config.layers {
            slots.push(LayerSlot {
                layer: TileLayer::new(*layer_config, config.clut)?,
                rom: Arc::clone(&empty),
                pen_usage: None,
            });
        }

        let textures: Vec<TextureInfo> = slots.iter().flat_map(|s| s.layer.textures()).collect();
        register_textures(&mut driver, &textures)?;
        info!(
            "{:?} video core ready: {} layers, {} texture pages",
            config.chipset,
            slots.len(),
            textures.len()
        );

        Ok(Self {
            driver,
            palette: PaletteRam::new(config.clut.banks, config.clut.colors_per_bank),
            framebuffer: Framebuffer::default(),
            palette_bank: 0,
            generation: 0,
            frame_count: 0,
            clip_min_y: FIRST_VISIBLE_LINE,
            clip_max_y: LAST_VISIBLE_LINE + 1,
            scroll2_clip: Scroll2Clip::default(),
            high_owner: config.layer(LayerId::ScrollHigh).map(|_| LayerId::Scroll1),
            config,
            slots,
        })
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    pub fn chipset(&self) -> Chipset {
        self.config.chipset
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn layer(&self, id: LayerId) -> Option<&TileLayer> {
        self.slots.iter().map(|s| &s.layer).find(|l| l.id() == id)
    }

    fn slot_index(&self, id: LayerId) -> Result<usize, VideoError> {
        self.slots
            .iter()
            .position(|s| s.layer.id() == id)
            .ok_or(VideoError::UnknownLayer(id))
    }

    /// Attach the graphics ROM a layer decodes from. The layer cache is
    /// dropped at the next frame start.
    pub fn attach_rom(&mut self, id: LayerId, rom: Arc<GfxRom>) -> Result<(), VideoError> {
        let index = self.slot_index(id)?;
        let chipset = self.config.chipset;
        let slot = &mut self.slots[index];

        let software = matches!(
            (chipset, id),
            (Chipset::Cps1 | Chipset::Cps2, LayerId::Scroll2) | (Chipset::NeoGeoMvs | Chipset::NeoGeoCd, LayerId::Sprite)
        );
        let config = *slot.layer.config();
        slot.pen_usage = software.then(|| PenUsage::scan(&rom, config.rom, config.tile, chipset.transparent_pen()));
        debug!("{id}: attached {} bytes of graphics ROM", rom.len());
        slot.rom = Arc::clone(&rom);
        slot.layer.request_clear();

        if self.high_owner == Some(id) {
            let high = self.slot_index(LayerId::ScrollHigh)?;
            self.slots[high].rom = rom;
            self.slots[high].layer.request_clear();
        }
        Ok(())
    }

    /// Start a frame: advance the generation, honour deferred clears and
    /// purge high-layer entries baked with rewritten palette rows.
    pub fn begin_frame(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.frame_count += 1;
        self.clip_min_y = FIRST_VISIBLE_LINE;
        self.clip_max_y = LAST_VISIBLE_LINE + 1;

        for slot in &mut self.slots {
            slot.layer.begin_frame(self.generation);
            slot.layer.purge_dirty_palette(&self.palette);
        }
        self.palette.clear_dirty();

        if self.config.mask_emulation {
            self.driver.clear_depth_buffer();
        }
    }

    /// Drop queued quads that were never flushed (priority lanes included).
    pub fn end_frame(&mut self) {
        for slot in &mut self.slots {
            slot.layer.clear_batch();
        }
    }

    /// Drop the cache of `id` at the next frame start.
    pub fn request_clear(&mut self, id: LayerId) -> Result<(), VideoError> {
        let index = self.slot_index(id)?;
        self.slots[index].layer.request_clear();
        Ok(())
    }

    /// Drop every cache at the next frame start.
    pub fn request_clear_all(&mut self) {
        for slot in &mut self.slots {
            slot.layer.request_clear();
        }
    }

    /// Emulator state was restored: every cached tile is now suspect.
    pub fn load_state(&mut self) {
        for slot in &mut self.slots {
            slot.layer.reset();
            slot.layer.clear_batch();
        }
        info!("state loaded, tile caches cleared");
    }

    /// Vertical range drawn by the current partial update.
    pub fn set_clip_range(&mut self, start: i32, end: i32) {
        self.clip_min_y = start;
        self.clip_max_y = end + 1;
    }

    /// CPS2 sprites are drawn only when their origin lies inside the
    /// visible window, one tile above the clip top included.
    pub fn object_visible(&self, x: i32, y: i32) -> bool {
        x > 48 && x < 448 && y > self.clip_min_y - 16 && y < self.clip_max_y
    }

    /// Queue a cached tile draw on `id`.
    pub fn draw(&mut self, id: LayerId, draw: TileDraw) -> Result<bool, VideoError> {
        let index = self.slot_index(id)?;
        let slot = &mut self.slots[index];
        let src = DrawSources {
            rom: &slot.rom,
            palette: &self.palette,
            palette_bank: self.palette_bank,
        };
        Ok(slot.layer.draw(&src, draw))
    }

    /// Pick the high layer's owner among the scroll layers. A change
    /// rebuilds the high cache for the owner's tile size.
    pub fn set_high_owner(&mut self, owner: LayerId) -> Result<bool, VideoError> {
        if !matches!(owner, LayerId::Scroll1 | LayerId::Scroll2 | LayerId::Scroll3) {
            return Err(VideoError::UnknownLayer(owner));
        }
        if self.high_owner == Some(owner) {
            return Ok(false);
        }
        let source = *self
            .config
            .layer(owner)
            .ok_or(VideoError::UnknownLayer(owner))?;
        let index = self.slot_index(LayerId::ScrollHigh)?;
        let rom = Arc::clone(&self.slots[self.slot_index(owner)?].rom);

        let high = &mut self.slots[index];
        high.layer.retarget(source.tile, source.rom, source.clut_base_row)?;
        high.rom = rom;
        self.high_owner = Some(owner);
        debug!("SCROLLH now follows {owner}");
        Ok(true)
    }

    pub fn high_owner(&self) -> Option<LayerId> {
        self.high_owner
    }

    /// Purge high-layer tiles decoded for transparency `group`.
    pub fn purge_transparency_group(&mut self, group: u32) -> Result<usize, VideoError> {
        let index = self.slot_index(LayerId::ScrollHigh)?;
        Ok(self.slots[index].layer.purge_transparency_group(group))
    }

    /// Set the SCROLL2 band from the inclusive line range.
    pub fn set_scroll2_clip(&mut self, min_y: i32, max_y: i32) {
        self.scroll2_clip = Scroll2Clip::new(min_y, max_y);
    }

    pub fn scroll2_clip(&self) -> Scroll2Clip {
        self.scroll2_clip
    }

    /// Draw a SCROLL2 tile through the cache, or straight into the
    /// framebuffer when the band is narrower than a tile. `tpens` other
    /// than [`ALL_PENS`] selects the high layer, which SCROLL2 then owns.
    pub fn draw_scroll2(&mut self, x: i16, y: i16, code: u32, attr: u16, tpens: u16) -> Result<bool, VideoError> {
        if self.scroll2_clip.uses_hardware() {
            let draw = TileDraw::new(x, y, code, attr);
            return if tpens == ALL_PENS {
                self.draw(LayerId::Scroll2, draw)
            } else {
                self.set_high_owner(LayerId::Scroll2)?;
                self.draw(LayerId::ScrollHigh, draw.with_tpens(tpens))
            };
        }

        let index = self.slot_index(LayerId::Scroll2)?;
        let slot = &self.slots[index];
        let empty = PenUsage::default();
        let usage = slot.pen_usage.as_ref().unwrap_or(&empty);
        let tile = Scroll2Tile {
            x: x as i32,
            y: y as i32,
            code,
            attr,
            tpens,
        };
        Ok(software::draw_scroll2_tile(
            &mut self.framebuffer,
            &slot.rom,
            usage,
            &self.palette,
            self.scroll2_clip,
            tile,
        ))
    }

    /// Draw one shrunk Neo-Geo sprite line into the framebuffer.
    pub fn draw_sprite_line(&mut self, line: SpriteLineDraw) -> Result<(), VideoError> {
        let index = self.slot_index(LayerId::Sprite)?;
        let slot = &self.slots[index];
        let opaque = slot.pen_usage.as_ref().is_some_and(|u| u.get(line.code).is_opaque());
        let base_row = self.palette_bank * self.config.clut.colors_per_bank / PENS_PER_ROW;
        software::draw_sprite_line(
            &mut self.framebuffer,
            &slot.rom,
            &self.palette,
            base_row,
            SpriteLineDraw {
                opaque: line.opaque || opaque,
                ..line
            },
        );
        Ok(())
    }

    /// Flush one layer. SCROLL2 is scissored to its band.
    pub fn flush(&mut self, id: LayerId) -> Result<FlushStats, VideoError> {
        let index = self.slot_index(id)?;
        let clipped = id == LayerId::Scroll2 && self.scroll2_clip.uses_hardware();
        if clipped {
            let clip = self.scroll2_clip;
            self.driver
                .scissor(Rect::new(64, clip.min_y as i16, 448, clip.max_y as i16));
        }
        let stats = self.slots[index].layer.flush(&mut self.driver, &self.palette);
        if clipped {
            self.driver.scissor(SCREEN_SCISSOR);
        }
        Ok(stats)
    }

    /// Flush `lanes` of a priority layer, scissored to the current clip
    /// range. Lanes stay queued so the rest can be drawn between other
    /// layers.
    pub fn flush_lanes(&mut self, id: LayerId, lanes: RangeInclusive<usize>) -> Result<FlushStats, VideoError> {
        let index = self.slot_index(id)?;
        let slot = &mut self.slots[index];
        if slot.layer.config().batching != Batching::PriorityLanes {
            return Ok(slot.layer.flush(&mut self.driver, &self.palette));
        }
        let depth = if self.config.mask_emulation {
            DepthMode::MaskEmulation
        } else {
            DepthMode::Off
        };
        self.driver.scissor(Rect::new(
            64,
            self.clip_min_y as i16,
            448,
            self.clip_max_y as i16,
        ));
        let stats = slot.layer.flush_lanes(&mut self.driver, &self.palette, lanes, depth);
        self.driver.scissor(SCREEN_SCISSOR);
        Ok(stats)
    }

    /// Release every texture and hand the driver back.
    pub fn shutdown(mut self) -> D {
        for slot in self.slots.iter().rev() {
            for info in slot.layer.textures().iter().rev() {
                self.driver.release_texture(info.texture);
            }
        }
        self.driver
    }

    pub fn stats(&self) -> RenderStats {
        let mut totals = LayerStats::default();
        for slot in &self.slots {
            totals.merge(slot.layer.stats());
        }
        RenderStats {
            frame_count: self.frame_count,
            generation: self.generation,
            resident_tiles: self.slots.iter().map(|s| s.layer.cache().len()).sum(),
            totals,
        }
    }
}

/// Render statistics since creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub frame_count: u64,
    pub generation: u32,
    pub resident_tiles: usize,
    pub totals: LayerStats,
}
