// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Content fingerprints for decoded tiles.
//!
//! A key folds the ROM tile code together with the attribute bits that change
//! the decoded texels. The bit layouts below mirror the hardware attribute
//! words and are fixed.

use std::fmt;

/// 32-bit fingerprint of one decoded tile instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpriteKey(u32);

impl SpriteKey {
    const BANK_SHIFT: u32 = 28;
    const HIGH_ATTR_MASK: u32 = 0x19F;
    const HIGH_ATTR_SHIFT: u32 = 16;
    const PALETTE_MASK: u32 = 0x1F;
    const GROUP_SHIFT: u32 = 23;

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// `code | ((attr & 0x0F) << 28)`
    pub const fn base(code: u32, attr: u16) -> Self {
        Self(code | (((attr as u32) & 0x0F) << Self::BANK_SHIFT))
    }

    /// `code | ((attr & 0x19F) << 16)`: palette row in bits 16..21,
    /// transparency group in bits 23 and up.
    pub const fn high(code: u32, attr: u16) -> Self {
        Self(code | (((attr as u32) & Self::HIGH_ATTR_MASK) << Self::HIGH_ATTR_SHIFT))
    }

    /// Neo-Geo fix layer: `code | (attr << 28)`.
    pub const fn neo_fix(code: u32, attr: u16) -> Self {
        Self(code | ((attr as u32) << Self::BANK_SHIFT))
    }

    /// Neo-Geo sprite layer: `code | ((attr & 0x0F00) << 20)`.
    pub const fn neo_sprite(code: u32, attr: u16) -> Self {
        Self(code | (((attr as u32) & 0x0F00) << 20))
    }

    /// Bucket index for a table of `mask + 1` buckets.
    pub const fn bucket(self, mask: u32) -> usize {
        (self.0 & mask) as usize
    }

    /// Palette row embedded by [`SpriteKey::high`].
    pub const fn high_palette(self) -> u8 {
        ((self.0 >> Self::HIGH_ATTR_SHIFT) & Self::PALETTE_MASK) as u8
    }

    /// Transparency group embedded by [`SpriteKey::high`].
    pub const fn high_pen_group(self) -> u32 {
        self.0 >> Self::GROUP_SHIFT
    }
}

impl fmt::Display for SpriteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Which key formula a layer uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-config", serde(rename_all = "snake_case"))]
pub enum KeyLayout {
    Base,
    High,
    NeoFix,
    NeoSprite,
}

impl KeyLayout {
    pub const fn make(self, code: u32, attr: u16) -> SpriteKey {
        match self {
            KeyLayout::Base => SpriteKey::base(code, attr),
            KeyLayout::High => SpriteKey::high(code, attr),
            KeyLayout::NeoFix => SpriteKey::neo_fix(code, attr),
            KeyLayout::NeoSprite => SpriteKey::neo_sprite(code, attr),
        }
    }

    /// Palette row a key was baked with, for layouts that bake one in.
    pub const fn palette_of(self, key: SpriteKey) -> Option<u8> {
        match self {
            KeyLayout::High => Some(key.high_palette()),
            _ => None,
        }
    }
}
