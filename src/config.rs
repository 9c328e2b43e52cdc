// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chipset video configuration.
//!
//! A [`VideoConfig`] lists the tile layers of one chipset together with the
//! geometry of their atlas, hash table and draw buffer. The built-in presets
//! describe the four supported boards; with the `serde-config` feature a
//! config can also be read from YAML or JSON.

use std::fmt;

use thiserror::Error;

use crate::atlas::{AtlasGeometry, BUF_WIDTH, PixelFormat, TEXTURE_HEIGHT, TileSize};
use crate::core::PENS_PER_ROW;
use crate::decode::RomLayout;
use crate::key::KeyLayout;

/// Lines of the CPS1 high-layer atlas.
pub const SCROLLH_HEIGHT: usize = 192;

/// Rows of one CLUT window (two 256-entry halves selected by attr bit 4).
const CLUT_WINDOW_ROWS: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-config", serde(rename_all = "snake_case"))]
pub enum LayerId {
    Object,
    Scroll1,
    Scroll2,
    Scroll3,
    /// CPS1 high-priority copy of one scroll layer.
    ScrollHigh,
    Fix,
    Sprite,
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerId::Object => "OBJECT",
            LayerId::Scroll1 => "SCROLL1",
            LayerId::Scroll2 => "SCROLL2",
            LayerId::Scroll3 => "SCROLL3",
            LayerId::ScrollHigh => "SCROLLH",
            LayerId::Fix => "FIX",
            LayerId::Sprite => "SPR",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-config", serde(rename_all = "snake_case"))]
pub enum Chipset {
    Cps1,
    Cps2,
    NeoGeoMvs,
    NeoGeoCd,
}

impl Chipset {
    pub const fn is_neogeo(self) -> bool {
        matches!(self, Chipset::NeoGeoMvs | Chipset::NeoGeoCd)
    }

    /// Pen that never draws.
    pub const fn transparent_pen(self) -> u8 {
        if self.is_neogeo() { 0 } else { 15 }
    }
}

/// How a layer turns submitted quads into draw calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-config", serde(rename_all = "snake_case"))]
pub enum Batching {
    /// Submission order, new run on every state change.
    Ordered,
    /// One run per state; only for layers whose tiles never overlap.
    GroupByBank,
    /// Eight priority lanes flushed low to high.
    PriorityLanes,
}

/// Palette RAM shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
pub struct ClutLayout {
    pub banks: usize,
    pub colors_per_bank: usize,
}

impl ClutLayout {
    pub const CPS: Self = Self {
        banks: 1,
        colors_per_bank: 3072,
    };
    pub const NEOGEO: Self = Self {
        banks: 2,
        colors_per_bank: 4096,
    };

    pub const fn colors(&self) -> usize {
        self.banks * self.colors_per_bank
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
pub struct LayerConfig {
    pub id: LayerId,
    pub tile: TileSize,
    /// Hash buckets, a power of two.
    pub buckets: usize,
    /// Texel lines per atlas page.
    pub height: usize,
    pub pages: usize,
    pub key: KeyLayout,
    pub rom: RomLayout,
    pub format: PixelFormat,
    /// First palette row of the layer's CLUT window.
    pub clut_base_row: usize,
    pub batching: Batching,
    /// Quads the layer buffers per flush.
    pub max_quads: usize,
}

impl LayerConfig {
    const fn cps(id: LayerId, tile: TileSize, buckets: usize, rom: RomLayout, clut_base_row: usize, max_quads: usize) -> Self {
        Self {
            id,
            tile,
            buckets,
            height: TEXTURE_HEIGHT,
            pages: 1,
            key: KeyLayout::Base,
            rom,
            format: PixelFormat::Indexed,
            clut_base_row,
            batching: Batching::Ordered,
            max_quads,
        }
    }

    pub const fn geometry(&self) -> AtlasGeometry {
        AtlasGeometry::new(self.tile, BUF_WIDTH, self.height, self.pages)
    }

    /// Pool capacity: one cache entry per atlas slot.
    pub const fn capacity(&self) -> usize {
        self.geometry().capacity()
    }

    fn validate(&self, clut: ClutLayout) -> Result<(), ConfigError> {
        if self.buckets == 0 || !self.buckets.is_power_of_two() {
            return Err(ConfigError::BucketCount {
                layer: self.id,
                buckets: self.buckets,
            });
        }
        if self.pages == 0 || self.height == 0 || self.height > TEXTURE_HEIGHT || self.height % self.tile.pixels() != 0 {
            return Err(ConfigError::AtlasShape {
                layer: self.id,
                height: self.height,
                pages: self.pages,
            });
        }
        if self.max_quads == 0 {
            return Err(ConfigError::NoDrawBuffer(self.id));
        }
        // Neo-Geo sprites address the whole bank through attr; others own one window
        let window_end = match self.key {
            KeyLayout::NeoSprite | KeyLayout::NeoFix => clut.colors_per_bank,
            _ => (self.clut_base_row + CLUT_WINDOW_ROWS) * PENS_PER_ROW,
        };
        if window_end > clut.colors_per_bank {
            return Err(ConfigError::ClutWindow {
                layer: self.id,
                end: window_end,
                colors: clut.colors_per_bank,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("layer {layer}: bucket count {buckets} is not a power of two")]
    BucketCount { layer: LayerId, buckets: usize },
    #[error("layer {layer}: atlas of {pages} page(s) x {height} lines does not fit the texture")]
    AtlasShape { layer: LayerId, height: usize, pages: usize },
    #[error("layer {0}: draw buffer holds no quads")]
    NoDrawBuffer(LayerId),
    #[error("layer {layer}: CLUT window ends at {end:#x}, bank holds {colors:#x} colours")]
    ClutWindow { layer: LayerId, end: usize, colors: usize },
    #[error("layer {0} is listed twice")]
    DuplicateLayer(LayerId),
    #[error("config parse error: {0}")]
    Parse(String),
}

/// Video layout of one chipset.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
pub struct VideoConfig {
    pub chipset: Chipset,
    pub clut: ClutLayout,
    /// Whether the priority flush emulates the sprite mask through depth.
    #[cfg_attr(feature = "serde-config", serde(default))]
    pub mask_emulation: bool,
    pub layers: Vec<LayerConfig>,
}

// Tilemap draw limits of a 384x224 CPS screen, one extra tile each side.
const fn tilemap_quads(tile: usize) -> usize {
    (384 / tile + 2) * (224 / tile + 2)
}

impl VideoConfig {
    fn cps_scrolls(scroll1: RomLayout) -> [LayerConfig; 3] {
        [
            LayerConfig::cps(LayerId::Scroll1, TileSize::X8, 0x200, scroll1, 32, tilemap_quads(8)),
            LayerConfig::cps(LayerId::Scroll2, TileSize::X16, 0x100, RomLayout::CPS_16, 64, tilemap_quads(16)),
            LayerConfig::cps(LayerId::Scroll3, TileSize::X32, 0x40, RomLayout::CPS_32, 96, tilemap_quads(32)),
        ]
    }

    pub fn cps1() -> Self {
        let mut layers = vec![LayerConfig::cps(
            LayerId::Object,
            TileSize::X16,
            0x200,
            RomLayout::CPS_16,
            0,
            0x1000,
        )];
        // gfxset picks the scroll1 half per draw; 0 is the default layout
        layers.extend(Self::cps_scrolls(RomLayout::cps1_8(0)));
        layers.push(LayerConfig {
            id: LayerId::ScrollHigh,
            tile: TileSize::X8,
            buckets: 0x200,
            height: SCROLLH_HEIGHT,
            pages: 1,
            key: KeyLayout::High,
            rom: RomLayout::cps1_8(0),
            format: PixelFormat::Direct,
            clut_base_row: 32,
            batching: Batching::Ordered,
            max_quads: tilemap_quads(8),
        });
        Self {
            chipset: Chipset::Cps1,
            clut: ClutLayout::CPS,
            mask_emulation: false,
            layers,
        }
    }

    pub fn cps2() -> Self {
        let mut object = LayerConfig::cps(LayerId::Object, TileSize::X16, 0x200, RomLayout::CPS_16, 0, 0x1400);
        object.batching = Batching::PriorityLanes;
        let mut layers = vec![object];
        layers.extend(Self::cps_scrolls(RomLayout::CPS2_8));
        Self {
            chipset: Chipset::Cps2,
            clut: ClutLayout::CPS,
            mask_emulation: true,
            layers,
        }
    }

    fn neogeo(chipset: Chipset) -> Self {
        let fix = LayerConfig {
            id: LayerId::Fix,
            tile: TileSize::X8,
            buckets: 0x200,
            height: TEXTURE_HEIGHT,
            pages: 1,
            key: KeyLayout::NeoFix,
            rom: RomLayout::NEO_FIX,
            format: PixelFormat::Indexed,
            clut_base_row: 0,
            batching: Batching::Ordered,
            max_quads: (320 / 8) * (240 / 8),
        };
        let sprite = LayerConfig {
            id: LayerId::Sprite,
            tile: TileSize::X16,
            buckets: 0x200,
            height: TEXTURE_HEIGHT,
            pages: 3,
            key: KeyLayout::NeoSprite,
            rom: RomLayout::NEO_SPRITE,
            format: PixelFormat::Indexed,
            clut_base_row: 0,
            batching: Batching::Ordered,
            max_quads: 0x3000,
        };
        Self {
            chipset,
            clut: ClutLayout::NEOGEO,
            mask_emulation: false,
            layers: vec![sprite, fix],
        }
    }

    pub fn neogeo_mvs() -> Self {
        Self::neogeo(Chipset::NeoGeoMvs)
    }

    pub fn neogeo_cd() -> Self {
        Self::neogeo(Chipset::NeoGeoCd)
    }

    pub fn preset(chipset: Chipset) -> Self {
        match chipset {
            Chipset::Cps1 => Self::cps1(),
            Chipset::Cps2 => Self::cps2(),
            Chipset::NeoGeoMvs => Self::neogeo_mvs(),
            Chipset::NeoGeoCd => Self::neogeo_cd(),
        }
    }

    pub fn layer(&self, id: LayerId) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, layer) in self.layers.iter().enumerate() {
            if self.layers[..i].iter().any(|l| l.id == layer.id) {
                return Err(ConfigError::DuplicateLayer(layer.id));
            }
            layer.validate(self.clut)?;
        }
        Ok(())
    }

    #[cfg(feature = "serde-config")]
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "serde-config")]
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "serde-config")]
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
