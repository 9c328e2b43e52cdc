// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later


// A small demo that pushes a few frames through the CPS1 and Neo-Geo
// video cores and prints the cache statistics.
use std::sync::Arc;

use anyhow::{Context, Result};
use arcadevid_core::decode::ALL_PENS;
use arcadevid_core::software::SpriteLineDraw;
use arcadevid_core::{Chipset, GfxRom, LayerId, RecordingDriver, TileDraw, VideoConfig, VideoCore};

fn demo_rom(len: usize) -> Arc<GfxRom> {
    let data = (0..len).map(|i| (i as u8).wrapping_mul(0x11) ^ 0x0f).collect();
    Arc::new(GfxRom::new(data))
}

fn run_cps1(frames: u32) -> Result<()> {
    let mut video = VideoCore::new(VideoConfig::preset(Chipset::Cps1), RecordingDriver::new())
        .context("failed to build the CPS1 video core")?;
    let rom = demo_rom(0x40000);
    for id in [LayerId::Object, LayerId::Scroll1, LayerId::Scroll2, LayerId::Scroll3] {
        video.attach_rom(id, Arc::clone(&rom))?;
    }

    for frame in 0..frames {
        video.begin_frame();
        for i in 0..64u32 {
            let x = 64 + ((i % 16) * 24) as i16;
            let y = 16 + ((i / 16) * 24) as i16 + frame as i16;
            video.draw(LayerId::Object, TileDraw::new(x, y, i % 24, (i % 4) as u16))?;
        }
        for row in 0..14i16 {
            for col in 0..24i16 {
                let code = (row * 24 + col) as u32 + frame;
                video.draw_scroll2(64 + col * 16, 16 + row * 16, code, 0x02, ALL_PENS)?;
            }
        }
        video.flush(LayerId::Scroll2)?;
        video.flush(LayerId::Object)?;
        video.end_frame();
    }

    let stats = video.stats();
    println!("CPS1 after {} frames:", stats.frame_count);
    println!("  Resident tiles: {}", stats.resident_tiles);
    println!("  Hits/misses:    {}/{}", stats.totals.hits, stats.totals.misses);
    println!("  Decodes:        {}", stats.totals.decodes);
    println!("  Draw runs:      {}", stats.totals.runs);
    println!("  Quads:          {}", stats.totals.quads);
    println!();
    Ok(())
}

fn run_neogeo(frames: u32) -> Result<()> {
    let mut video = VideoCore::new(VideoConfig::preset(Chipset::NeoGeoMvs), RecordingDriver::new())
        .context("failed to build the Neo-Geo video core")?;
    let rom = demo_rom(0x20000);
    video.attach_rom(LayerId::Sprite, Arc::clone(&rom))?;
    video.attach_rom(LayerId::Fix, rom)?;

    for _ in 0..frames {
        video.begin_frame();
        for column in 0..40u32 {
            let x = (column * 16) as i16;
            video.draw(LayerId::Sprite, TileDraw::new(x, 32, column, 0x0100).scaled(12, 16))?;
            video.draw_sprite_line(SpriteLineDraw {
                x: x as i32,
                y: 200,
                zoom_x: 12,
                sprite_y: 0,
                code: column,
                attr: 0x0100,
                opaque: false,
            })?;
        }
        for col in 0..40i16 {
            video.draw(LayerId::Fix, TileDraw::new(col * 8, 16, 0x20 + col as u32, 0x1))?;
        }
        video.flush(LayerId::Sprite)?;
        video.flush(LayerId::Fix)?;
        video.end_frame();
    }

    let stats = video.stats();
    println!("Neo-Geo after {} frames:", stats.frame_count);
    println!("  Resident tiles: {}", stats.resident_tiles);
    println!("  Hits/misses:    {}/{}", stats.totals.hits, stats.totals.misses);
    println!("  Quads:          {}", stats.totals.quads);
    println!("  Blits:          {}", video.driver.blits().count());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    println!("Arcadevid video core v0.1.0");
    println!("===========================");
    println!();

    run_cps1(8)?;
    run_neogeo(8)?;
    Ok(())
}
