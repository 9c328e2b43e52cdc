// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Draw-list batching.
//!
//! Every draw becomes a two-vertex quad (top-left and bottom-right corners
//! with texel coordinates). Quads are grouped into runs that share one GPU
//! state, a texture page plus CLUT window. [`OrderedBatcher`] keeps runs in
//! submission order and starts a new run whenever the state changes, so
//! overlapping sprites with different palettes still layer correctly.
//! [`GroupedBatcher`] buckets quads by state for tilemaps whose tiles never
//! overlap.

use bitflags::bitflags;

use crate::config::LayerId;
use crate::core::PaletteRam;
use crate::driver::{CLUT_ENTRIES, ClutRef, DriverError, TextureRef, VideoDriver};

/// Sprite-mode vertex as consumed by the GPU backends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Vertex {
    pub u: u16,
    pub v: u16,
    pub color: u16,
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flip: u8 {
        const X = 0x01;
        const Y = 0x02;
    }
}

impl Flip {
    /// CPS attribute word: flip-x 0x20, flip-y 0x40.
    pub fn from_cps_attr(attr: u16) -> Self {
        Self::from_bits_truncate(((attr & 0x60) >> 5) as u8)
    }

    /// Neo-Geo sprite attribute: flip-x bit 0, flip-y bit 1.
    pub fn from_neo_attr(attr: u16) -> Self {
        Self::from_bits_truncate((attr & 0x03) as u8)
    }
}

/// Screen placement of one quad.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuadPlacement {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
    pub z: i16,
}

impl QuadPlacement {
    /// Unscaled square tile at `(x, y)`.
    pub const fn tile(x: i16, y: i16, size: i16) -> Self {
        Self {
            x,
            y,
            width: size,
            height: size,
            z: 0,
        }
    }
}

/// Build the two corner vertices of a tile whose texels start at `(u, v)`.
///
/// The texel edge that receives `+tile` is the vertex indexed by the cleared
/// flip bit, so a flipped axis swaps its texture coordinates.
pub fn make_quad(u: u16, v: u16, tile: u16, place: QuadPlacement, flip: Flip) -> [Vertex; 2] {
    let corner = Vertex {
        u,
        v,
        color: 0,
        x: place.x,
        y: place.y,
        z: place.z,
    };
    let mut quad = [corner; 2];

    let ux = usize::from(!flip.contains(Flip::X));
    let vy = usize::from(!flip.contains(Flip::Y));
    quad[ux].u += tile;
    quad[vy].v += tile;

    quad[1].x = quad[1].x.wrapping_add(place.width);
    quad[1].y = quad[1].y.wrapping_add(place.height);
    quad
}

/// GPU state a run is drawn with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub page: u8,
    pub clut: Option<ClutRef>,
}

/// Contiguous vertex range sharing one [`BatchKey`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawBatch {
    pub start: usize,
    pub count: usize,
    pub key: BatchKey,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub runs: usize,
    pub quads: usize,
}

impl FlushStats {
    pub fn merge(&mut self, other: FlushStats) {
        self.runs += other.runs;
        self.quads += other.quads;
    }
}

/// Issue one CLUT upload (for indexed runs) and one blit per run.
pub fn emit_runs<D>(
    driver: &mut D,
    layer: LayerId,
    palette: &PaletteRam,
    vertices: &[Vertex],
    runs: &[DrawBatch],
) -> Result<FlushStats, DriverError>
where
    D: VideoDriver + ?Sized,
{
    let mut stats = FlushStats::default();
    if vertices.is_empty() {
        return Ok(stats);
    }
    driver.flush_cache(vertices);

    for run in runs.iter().filter(|r| r.count > 0) {
        if let Some(clut) = run.key.clut {
            let end = clut.offset + CLUT_ENTRIES;
            let colors = palette
                .colors()
                .get(clut.offset..end)
                .ok_or(DriverError::ClutOutOfRange { offset: clut.offset, end })?;
            driver.upload_clut(colors, clut)?;
        }
        let texture = TextureRef::new(layer, run.key.page);
        driver.blit_texture(texture, run.key.clut, &vertices[run.start..run.start + run.count])?;
        stats.runs += 1;
        stats.quads += run.count / 2;
    }
    Ok(stats)
}

/// Order-preserving batcher.
#[derive(Clone, Debug)]
pub struct OrderedBatcher {
    vertices: Vec<Vertex>,
    runs: Vec<DrawBatch>,
    max_quads: usize,
    dropped: usize,
}

impl OrderedBatcher {
    pub fn new(max_quads: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(max_quads * 2),
            runs: Vec::new(),
            max_quads,
            dropped: 0,
        }
    }

    /// Append a quad; returns `false` if the vertex buffer is full.
    pub fn submit(&mut self, quad: [Vertex; 2], key: BatchKey) -> bool {
        if self.vertices.len() >= self.max_quads * 2 {
            self.dropped += 1;
            return false;
        }
        match self.runs.last_mut() {
            Some(run) if run.key == key => run.count += 2,
            _ => self.runs.push(DrawBatch {
                start: self.vertices.len(),
                count: 2,
                key,
            }),
        }
        self.vertices.extend_from_slice(&quad);
        true
    }

    pub fn runs(&self) -> &[DrawBatch] {
        &self.runs
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn quads(&self) -> usize {
        self.vertices.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Quads refused since the last clear.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.runs.clear();
        self.dropped = 0;
    }

    /// Emit every run in submission order, then clear.
    pub fn flush<D>(&mut self, driver: &mut D, layer: LayerId, palette: &PaletteRam) -> Result<FlushStats, DriverError>
    where
        D: VideoDriver + ?Sized,
    {
        let result = emit_runs(driver, layer, palette, &self.vertices, &self.runs);
        self.clear();
        result
    }
}

/// State-grouped batcher for non-overlapping tilemaps.
#[derive(Clone, Debug)]
pub struct GroupedBatcher {
    groups: Vec<(BatchKey, Vec<Vertex>)>,
    max_quads: usize,
    quads: usize,
    dropped: usize,
}

impl GroupedBatcher {
    pub fn new(max_quads: usize) -> Self {
        Self {
            groups: Vec::new(),
            max_quads,
            quads: 0,
            dropped: 0,
        }
    }

    pub fn submit(&mut self, quad: [Vertex; 2], key: BatchKey) -> bool {
        if self.quads >= self.max_quads {
            self.dropped += 1;
            return false;
        }
        match self.groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, vertices)) => vertices.extend_from_slice(&quad),
            None => self.groups.push((key, quad.to_vec())),
        }
        self.quads += 1;
        true
    }

    pub fn quads(&self) -> usize {
        self.quads
    }

    pub fn is_empty(&self) -> bool {
        self.quads == 0
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn clear(&mut self) {
        for (_, vertices) in &mut self.groups {
            vertices.clear();
        }
        self.quads = 0;
        self.dropped = 0;
    }

    /// Emit one run per state in first-seen order, then clear.
    pub fn flush<D>(&mut self, driver: &mut D, layer: LayerId, palette: &PaletteRam) -> Result<FlushStats, DriverError>
    where
        D: VideoDriver + ?Sized,
    {
        let mut stats = FlushStats::default();
        let mut result = Ok(());
        for (key, vertices) in &self.groups {
            let run = [DrawBatch {
                start: 0,
                count: vertices.len(),
                key: *key,
            }];
            match emit_runs(driver, layer, palette, vertices, &run) {
                Ok(s) => stats.merge(s),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        self.clear();
        result.map(|()| stats)
    }
}

/// Batching policy of a layer.
#[derive(Clone, Debug)]
pub enum LayerBatcher {
    Ordered(OrderedBatcher),
    Grouped(GroupedBatcher),
}

impl LayerBatcher {
    pub fn submit(&mut self, quad: [Vertex; 2], key: BatchKey) -> bool {
        match self {
            LayerBatcher::Ordered(b) => b.submit(quad, key),
            LayerBatcher::Grouped(b) => b.submit(quad, key),
        }
    }

    pub fn quads(&self) -> usize {
        match self {
            LayerBatcher::Ordered(b) => b.quads(),
            LayerBatcher::Grouped(b) => b.quads(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.quads() == 0
    }

    pub fn dropped(&self) -> usize {
        match self {
            LayerBatcher::Ordered(b) => b.dropped(),
            LayerBatcher::Grouped(b) => b.dropped(),
        }
    }

    pub fn clear(&mut self) {
        match self {
            LayerBatcher::Ordered(b) => b.clear(),
            LayerBatcher::Grouped(b) => b.clear(),
        }
    }

    pub fn flush<D>(&mut self, driver: &mut D, layer: LayerId, palette: &PaletteRam) -> Result<FlushStats, DriverError>
    where
        D: VideoDriver + ?Sized,
    {
        match self {
            LayerBatcher::Ordered(b) => b.flush(driver, layer, palette),
            LayerBatcher::Grouped(b) => b.flush(driver, layer, palette),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::PixelFormat;
    use crate::driver::{RecordingDriver, TextureInfo, register_textures};
    use pretty_assertions::assert_eq;

    fn key(bank: usize) -> BatchKey {
        BatchKey {
            page: 0,
            clut: Some(ClutRef::at(bank * CLUT_ENTRIES, 3072)),
        }
    }

    fn tagged(tag: i16) -> [Vertex; 2] {
        make_quad(0, 0, 16, QuadPlacement::tile(tag, 0, 16), Flip::empty())
    }

    fn driver_for(layer: LayerId) -> RecordingDriver {
        let mut driver = RecordingDriver::new();
        register_textures(
            &mut driver,
            &[TextureInfo {
                texture: TextureRef::new(layer, 0),
                width: 512,
                height: 512,
                format: PixelFormat::Indexed,
            }],
        )
        .unwrap();
        driver.take_calls();
        driver
    }

    #[test]
    fn quad_without_flip_spans_tile() {
        let quad = make_quad(32, 48, 16, QuadPlacement::tile(100, 50, 16), Flip::empty());
        assert_eq!((quad[0].u, quad[0].v, quad[1].u, quad[1].v), (32, 48, 48, 64));
        assert_eq!((quad[0].x, quad[0].y, quad[1].x, quad[1].y), (100, 50, 116, 66));
    }

    #[test]
    fn flipped_quad_swaps_texel_edges() {
        let quad = make_quad(32, 48, 16, QuadPlacement::tile(0, 0, 16), Flip::from_cps_attr(0x60));
        assert_eq!((quad[0].u, quad[1].u), (48, 32));
        assert_eq!((quad[0].v, quad[1].v), (64, 48));

        let quad = make_quad(0, 0, 8, QuadPlacement::tile(0, 0, 8), Flip::from_cps_attr(0x20));
        assert_eq!((quad[0].u, quad[1].u, quad[0].v, quad[1].v), (8, 0, 0, 8));
    }

    #[test]
    fn neo_flip_bits_and_shrunk_size() {
        assert_eq!(Flip::from_neo_attr(0x0f02), Flip::Y);
        let place = QuadPlacement {
            x: 10,
            y: 20,
            width: 9,
            height: 12,
            z: 0,
        };
        let quad = make_quad(0, 0, 16, place, Flip::from_neo_attr(0x01));
        assert_eq!((quad[0].u, quad[1].u), (16, 0));
        assert_eq!((quad[1].x, quad[1].y), (19, 32));
    }

    #[test]
    fn runs_split_on_bank_change_and_keep_order() {
        let mut batcher = OrderedBatcher::new(64);
        let banks = [0, 0, 1, 0, 1, 1, 0];
        for (i, bank) in banks.iter().enumerate() {
            assert!(batcher.submit(tagged(i as i16), key(*bank)));
        }
        let counts: Vec<_> = batcher.runs().iter().map(|r| (r.start, r.count)).collect();
        assert_eq!(counts, vec![(0, 4), (4, 2), (6, 2), (8, 4), (12, 2)]);

        let mut driver = driver_for(LayerId::Object);
        let palette = PaletteRam::new(1, 3072);
        let stats = batcher.flush(&mut driver, LayerId::Object, &palette).unwrap();
        assert_eq!(stats, FlushStats { runs: 5, quads: 7 });

        // concatenated runs reproduce submission order
        let order: Vec<i16> = driver.blits().flat_map(|(_, _, v)| v.iter().step_by(2).map(|v| v.x)).collect();
        assert_eq!(order, (0..7).collect::<Vec<_>>());
        assert!(batcher.is_empty());
    }

    #[test]
    fn flush_uploads_clut_before_each_run() {
        let mut batcher = OrderedBatcher::new(8);
        batcher.submit(tagged(0), key(0));
        batcher.submit(tagged(1), key(1));

        let mut driver = driver_for(LayerId::Object);
        let palette = PaletteRam::new(1, 3072);
        batcher.flush(&mut driver, LayerId::Object, &palette).unwrap();

        let kinds: Vec<&str> = driver
            .calls
            .iter()
            .map(|c| match c {
                crate::driver::DriverCall::FlushCache(_) => "flush",
                crate::driver::DriverCall::UploadClut(_) => "clut",
                crate::driver::DriverCall::Blit { .. } => "blit",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["flush", "clut", "blit", "clut", "blit"]);
    }

    #[test]
    fn overflow_drops_quads() {
        let mut batcher = OrderedBatcher::new(2);
        assert!(batcher.submit(tagged(0), key(0)));
        assert!(batcher.submit(tagged(1), key(0)));
        assert!(!batcher.submit(tagged(2), key(0)));
        assert_eq!(batcher.quads(), 2);
        assert_eq!(batcher.dropped(), 1);
    }

    #[test]
    fn clut_window_past_palette_is_an_error() {
        let mut batcher = OrderedBatcher::new(4);
        batcher.submit(tagged(0), key(20));
        let mut driver = driver_for(LayerId::Object);
        let palette = PaletteRam::new(1, 3072);
        let err = batcher.flush(&mut driver, LayerId::Object, &palette).unwrap_err();
        assert!(matches!(err, DriverError::ClutOutOfRange { .. }));
        assert!(batcher.is_empty());
    }

    #[test]
    fn grouped_batcher_emits_one_run_per_bank() {
        let mut batcher = GroupedBatcher::new(16);
        for (i, bank) in [0, 1, 0, 1, 0].iter().enumerate() {
            batcher.submit(tagged(i as i16), key(*bank));
        }
        let mut driver = driver_for(LayerId::Scroll2);
        let palette = PaletteRam::new(1, 3072);
        let stats = batcher.flush(&mut driver, LayerId::Scroll2, &palette).unwrap();
        assert_eq!(stats, FlushStats { runs: 2, quads: 5 });

        let xs: Vec<Vec<i16>> = driver
            .blits()
            .map(|(_, _, v)| v.iter().step_by(2).map(|v| v.x).collect())
            .collect();
        assert_eq!(xs, vec![vec![0, 2, 4], vec![1, 3]]);
    }
}
