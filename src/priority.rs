// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Priority-lane batching for sprites with a per-sprite priority value.
//!
//! Quads are threaded onto one of eight per-priority lists through index
//! links. A flush walks a lane range low to high, flattens it and splits runs
//! on state changes exactly like the ordered batcher. With mask emulation
//! the per-pixel priority compare of the hardware is replaced by the host
//! depth test: lane 0 only writes depth, the remaining lanes are drawn
//! against it.

use std::ops::RangeInclusive;

use crate::batch::{BatchKey, DrawBatch, FlushStats, Vertex, emit_runs};
use crate::config::LayerId;
use crate::core::PaletteRam;
use crate::driver::{DriverError, VideoDriver};

pub const PRIORITY_LANES: usize = 8;

/// How lane priorities reach the screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthMode {
    /// Draw order alone decides.
    Off,
    /// Lane 0 masks the others through the depth buffer.
    MaskEmulation,
}

#[derive(Clone, Debug)]
struct LaneNode {
    quad: [Vertex; 2],
    key: BatchKey,
    next: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct PriorityBatcher {
    nodes: Vec<LaneNode>,
    heads: [Option<u32>; PRIORITY_LANES],
    tails: [Option<u32>; PRIORITY_LANES],
    counts: [usize; PRIORITY_LANES],
    max_quads: usize,
    dropped: usize,
    flat: Vec<Vertex>,
    runs: Vec<DrawBatch>,
}

impl PriorityBatcher {
    pub fn new(max_quads: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(max_quads),
            heads: [None; PRIORITY_LANES],
            tails: [None; PRIORITY_LANES],
            counts: [0; PRIORITY_LANES],
            max_quads,
            dropped: 0,
            flat: Vec::with_capacity(max_quads * 2),
            runs: Vec::new(),
        }
    }

    /// Append a quad to `lane` (masked to 0..8).
    pub fn submit(&mut self, lane: usize, quad: [Vertex; 2], key: BatchKey) -> bool {
        if self.nodes.len() >= self.max_quads {
            self.dropped += 1;
            return false;
        }
        let lane = lane & (PRIORITY_LANES - 1);
        let index = self.nodes.len() as u32;
        self.nodes.push(LaneNode { quad, key, next: None });

        match self.tails[lane] {
            Some(tail) => self.nodes[tail as usize].next = Some(index),
            None => self.heads[lane] = Some(index),
        }
        self.tails[lane] = Some(index);
        self.counts[lane] += 1;
        true
    }

    pub fn lane_len(&self, lane: usize) -> usize {
        self.counts.get(lane).copied().unwrap_or(0)
    }

    pub fn quads(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.heads = [None; PRIORITY_LANES];
        self.tails = [None; PRIORITY_LANES];
        self.counts = [0; PRIORITY_LANES];
        self.dropped = 0;
    }

    fn range_len(&self, lanes: &RangeInclusive<usize>) -> usize {
        lanes.clone().map(|lane| self.lane_len(lane)).sum()
    }

    // Flatten `lanes` into `flat`/`runs`, one run per state change. A
    // `forced` key puts everything in a single run drawn with that state.
    fn gather(&mut self, lanes: RangeInclusive<usize>, forced: Option<BatchKey>) {
        self.flat.clear();
        self.runs.clear();
        for lane in lanes {
            let Some(&head) = self.heads.get(lane) else {
                break;
            };
            let mut cursor = head;
            while let Some(i) = cursor {
                let node = &self.nodes[i as usize];
                let key = forced.unwrap_or(node.key);
                match self.runs.last_mut() {
                    Some(run) if run.key == key => run.count += 2,
                    _ => self.runs.push(DrawBatch {
                        start: self.flat.len(),
                        count: 2,
                        key,
                    }),
                }
                self.flat.extend_from_slice(&node.quad);
                cursor = node.next;
            }
        }
    }

    /// Draw lanes in `lanes` low to high. Lanes are kept until [`clear`];
    /// callers flush disjoint ranges between other layers.
    ///
    /// `mask_key` is the state lane 0 is drawn with under mask emulation.
    ///
    /// [`clear`]: PriorityBatcher::clear
    pub fn flush<D>(
        &mut self,
        driver: &mut D,
        layer: LayerId,
        palette: &PaletteRam,
        lanes: RangeInclusive<usize>,
        depth: DepthMode,
        mask_key: BatchKey,
    ) -> Result<FlushStats, DriverError>
    where
        D: VideoDriver + ?Sized,
    {
        let mut stats = FlushStats::default();
        let mut first = *lanes.start();
        let last = *lanes.end();

        if depth == DepthMode::MaskEmulation && first == 0 && self.lane_len(0) > 0 {
            self.gather(0..=0, Some(mask_key));
            driver.enable_depth_test();
            let result = emit_runs(driver, layer, palette, &self.flat, &self.runs);
            driver.disable_depth_test();
            driver.clear_color_buffer();
            stats.merge(result?);
            first = 1;
        }

        let remaining = first..=last;
        if self.range_len(&remaining) == 0 {
            return Ok(stats);
        }

        self.gather(remaining, None);
        let result = match depth {
            DepthMode::Off => emit_runs(driver, layer, palette, &self.flat, &self.runs),
            DepthMode::MaskEmulation => {
                driver.enable_depth_test();
                let result = emit_runs(driver, layer, palette, &self.flat, &self.runs);
                driver.disable_depth_test();
                result
            }
        };
        stats.merge(result?);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::PixelFormat;
    use crate::batch::{Flip, QuadPlacement, make_quad};
    use crate::driver::{ClutRef, DriverCall, RecordingDriver, TextureInfo, TextureRef, register_textures};
    use pretty_assertions::assert_eq;

    fn key(high: bool) -> BatchKey {
        BatchKey {
            page: 0,
            clut: Some(ClutRef::at(if high { 256 } else { 0 }, 8192)),
        }
    }

    fn quad(tag: i16, z: i16) -> [Vertex; 2] {
        let place = QuadPlacement {
            x: tag,
            y: 0,
            width: 16,
            height: 16,
            z,
        };
        make_quad(0, 0, 16, place, Flip::empty())
    }

    fn setup() -> (RecordingDriver, PaletteRam) {
        let mut driver = RecordingDriver::new();
        register_textures(
            &mut driver,
            &[TextureInfo {
                texture: TextureRef::new(LayerId::Object, 0),
                width: 512,
                height: 512,
                format: PixelFormat::Indexed,
            }],
        )
        .unwrap();
        driver.take_calls();
        (driver, PaletteRam::new(1, 4096))
    }

    fn drawn_tags(driver: &RecordingDriver) -> Vec<i16> {
        driver
            .blits()
            .flat_map(|(_, _, v)| v.iter().step_by(2).map(|v| v.x))
            .collect()
    }

    #[test]
    fn lanes_flush_low_to_high_in_submission_order() {
        let (mut driver, palette) = setup();
        let mut batcher = PriorityBatcher::new(32);
        batcher.submit(3, quad(0, 0), key(false));
        batcher.submit(1, quad(1, 0), key(false));
        batcher.submit(3, quad(2, 0), key(true));
        batcher.submit(1, quad(3, 0), key(true));
        batcher.submit(6, quad(4, 0), key(true));

        let stats = batcher
            .flush(&mut driver, LayerId::Object, &palette, 0..=7, DepthMode::Off, key(false))
            .unwrap();

        assert_eq!(drawn_tags(&driver), vec![1, 3, 0, 2, 4]);
        // lane 1: low, high | lane 3: low, high | lane 6: high (merged)
        assert_eq!(stats, FlushStats { runs: 4, quads: 5 });
    }

    #[test]
    fn partial_ranges_leave_other_lanes() {
        let (mut driver, palette) = setup();
        let mut batcher = PriorityBatcher::new(32);
        batcher.submit(2, quad(0, 0), key(false));
        batcher.submit(5, quad(1, 0), key(false));

        batcher
            .flush(&mut driver, LayerId::Object, &palette, 0..=3, DepthMode::Off, key(false))
            .unwrap();
        assert_eq!(drawn_tags(&driver), vec![0]);

        driver.take_calls();
        batcher
            .flush(&mut driver, LayerId::Object, &palette, 4..=7, DepthMode::Off, key(false))
            .unwrap();
        assert_eq!(drawn_tags(&driver), vec![1]);
        assert_eq!(batcher.quads(), 2);
    }

    #[test]
    fn mask_emulation_draws_lane_zero_as_depth_only() {
        let (mut driver, palette) = setup();
        let mut batcher = PriorityBatcher::new(32);
        batcher.submit(0, quad(0, 7), key(true));
        batcher.submit(2, quad(1, 3), key(false));

        batcher
            .flush(
                &mut driver,
                LayerId::Object,
                &palette,
                0..=7,
                DepthMode::MaskEmulation,
                key(false),
            )
            .unwrap();

        let sequence: Vec<DriverCall> = driver
            .calls
            .iter()
            .filter(|c| !matches!(c, DriverCall::FlushCache(_) | DriverCall::UploadClut(_)))
            .cloned()
            .collect();
        let texture = TextureRef::new(LayerId::Object, 0);
        assert_eq!(
            sequence,
            vec![
                DriverCall::EnableDepthTest,
                DriverCall::Blit {
                    texture,
                    clut: key(false).clut,
                    vertices: quad(0, 7).to_vec()
                },
                DriverCall::DisableDepthTest,
                DriverCall::ClearColorBuffer,
                DriverCall::EnableDepthTest,
                DriverCall::Blit {
                    texture,
                    clut: key(false).clut,
                    vertices: quad(1, 3).to_vec()
                },
                DriverCall::DisableDepthTest,
            ]
        );
    }

    #[test]
    fn empty_range_draws_nothing() {
        let (mut driver, palette) = setup();
        let mut batcher = PriorityBatcher::new(4);
        batcher.submit(7, quad(0, 0), key(false));
        let stats = batcher
            .flush(&mut driver, LayerId::Object, &palette, 0..=3, DepthMode::MaskEmulation, key(false))
            .unwrap();
        assert_eq!(stats, FlushStats::default());
        assert!(driver.calls.is_empty());
    }

    #[test]
    fn lane_capacity_is_shared() {
        let mut batcher = PriorityBatcher::new(2);
        assert!(batcher.submit(0, quad(0, 0), key(false)));
        assert!(batcher.submit(9, quad(1, 0), key(false)));
        assert_eq!(batcher.lane_len(1), 1);
        assert!(!batcher.submit(4, quad(2, 0), key(false)));
        assert_eq!(batcher.dropped(), 1);
        batcher.clear();
        assert!(batcher.is_empty());
        assert_eq!(batcher.lane_len(0), 0);
    }
}
