// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later


//! Arcadevid arcade video core
//!
//! Tile and sprite texture caching plus draw batching for the CPS1, CPS2
//! and Neo-Geo video hardware. Tiles are decoded from graphics ROM into
//! texture atlases on first use, then drawn as textured quads submitted in
//! runs that share texture and palette state.

pub mod atlas;
pub mod batch;
pub mod cache;
pub mod config;
pub mod core;
pub mod decode;
pub mod driver;
pub mod key;
pub mod layer;
pub mod priority;
pub mod shrink;
pub mod software;
pub mod video;

// Re-export commonly used types
pub use cache::{CacheError, SpriteCache};
pub use config::{Chipset, LayerId, VideoConfig};
pub use self::core::{GfxRom, PaletteRam};
pub use driver::{RecordingDriver, VideoDriver};
pub use layer::{TileDraw, TileLayer};
pub use video::{RenderStats, VideoCore, VideoError};
