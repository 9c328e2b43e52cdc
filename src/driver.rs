// Copyright (C) 2025 The Arcadevid Authors
// Arcadevid Arcade Video Core
// This file is part of Arcadevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Video driver capability boundary.
//!
//! The core never talks to a GPU directly. Everything it needs from the host
//! renderer goes through [`VideoDriver`]: texture registration, atlas and
//! CLUT uploads, scissoring, depth control and batch blits. Failures are
//! reported as [`DriverError`] and the caller degrades to skipping the
//! affected flush.
//!
//! [`RecordingDriver`] is an in-memory backend that logs every call, used by
//! the demo binary and the tests.

use std::fmt;

use thiserror::Error;

use crate::atlas::{AtlasRegion, PixelFormat, TexelSlice};
use crate::batch::Vertex;
use crate::config::LayerId;

/// Colours per CLUT upload: 16 banks of 16 pens.
pub const CLUT_ENTRIES: usize = 256;

/// One texture page of a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureRef {
    pub layer: LayerId,
    pub page: u8,
}

impl TextureRef {
    pub const fn new(layer: LayerId, page: u8) -> Self {
        Self { layer, page }
    }
}

impl fmt::Display for TextureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.layer, self.page)
    }
}

/// Palette window used to resolve indexed texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClutRef {
    /// First palette entry of the window.
    pub offset: usize,
    /// Hardware CLUT bank the window belongs to.
    pub bank: u8,
}

impl ClutRef {
    /// Window at `offset`, bank derived from the bank width.
    pub const fn at(offset: usize, entries_per_bank: usize) -> Self {
        Self {
            offset,
            bank: (offset / entries_per_bank) as u8,
        }
    }
}

/// Texture registration parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureInfo {
    pub texture: TextureRef,
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

impl Rect {
    pub const fn new(left: i16, top: i16, right: i16, bottom: i16) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("texture {0} is not registered")]
    UnknownTexture(TextureRef),
    #[error("could not create texture {texture}: {reason}")]
    CreateFailed { texture: TextureRef, reason: String },
    #[error("upload to {texture} failed: {reason}")]
    UploadFailed { texture: TextureRef, reason: String },
    #[error("palette window {offset:#x}..{end:#x} lies outside palette RAM")]
    ClutOutOfRange { offset: usize, end: usize },
    #[error("blit on {texture} failed: {reason}")]
    BlitFailed { texture: TextureRef, reason: String },
}

/// Host renderer operations consumed by the flush paths.
pub trait VideoDriver {
    fn create_texture(&mut self, info: &TextureInfo) -> Result<(), DriverError>;

    fn release_texture(&mut self, texture: TextureRef);

    /// Push `region` of a staging atlas to the GPU copy of `texture`.
    fn upload_texture(
        &mut self,
        texture: TextureRef,
        region: AtlasRegion,
        texels: TexelSlice<'_>,
    ) -> Result<(), DriverError>;

    /// Push `colors` (one [`CLUT_ENTRIES`] window) as the active CLUT.
    fn upload_clut(&mut self, colors: &[u16], clut: ClutRef) -> Result<(), DriverError>;

    /// Draw one batch of 2-vertex quads.
    fn blit_texture(
        &mut self,
        texture: TextureRef,
        clut: Option<ClutRef>,
        vertices: &[Vertex],
    ) -> Result<(), DriverError>;

    fn scissor(&mut self, rect: Rect);

    /// Coherency hint before the GPU reads `vertices`.
    fn flush_cache(&mut self, _vertices: &[Vertex]) {}

    fn enable_depth_test(&mut self) {}

    fn disable_depth_test(&mut self) {}

    fn clear_depth_buffer(&mut self) {}

    fn clear_color_buffer(&mut self) {}
}

/// Register every texture in order. On failure, textures registered so far
/// are released newest first and the error is returned.
pub fn register_textures<D>(driver: &mut D, textures: &[TextureInfo]) -> Result<(), DriverError>
where
    D: VideoDriver + ?Sized,
{
    for (i, info) in textures.iter().enumerate() {
        if let Err(err) = driver.create_texture(info) {
            log::warn!("texture registration failed at {}: {err}", info.texture);
            for done in textures[..i].iter().rev() {
                driver.release_texture(done.texture);
            }
            return Err(err);
        }
        log::debug!(
            "registered texture {} ({}x{} {:?})",
            info.texture,
            info.width,
            info.height,
            info.format
        );
    }
    Ok(())
}

/// Calls observed by [`RecordingDriver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverCall {
    CreateTexture(TextureRef),
    ReleaseTexture(TextureRef),
    UploadTexture { texture: TextureRef, region: AtlasRegion },
    UploadClut(ClutRef),
    Blit {
        texture: TextureRef,
        clut: Option<ClutRef>,
        vertices: Vec<Vertex>,
    },
    Scissor(Rect),
    FlushCache(usize),
    EnableDepthTest,
    DisableDepthTest,
    ClearDepthBuffer,
    ClearColorBuffer,
}

/// Driver that records calls instead of rendering.
#[derive(Clone, Debug, Default)]
pub struct RecordingDriver {
    pub calls: Vec<DriverCall>,
    textures: Vec<TextureInfo>,
    /// Fail the n-th `create_texture` call (0-based).
    pub fail_create_at: Option<usize>,
    pub fail_uploads: bool,
    creates: usize,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn textures(&self) -> &[TextureInfo] {
        &self.textures
    }

    pub fn blits(&self) -> impl Iterator<Item = (&TextureRef, &Option<ClutRef>, &[Vertex])> + '_ {
        self.calls.iter().filter_map(|call| match call {
            DriverCall::Blit {
                texture,
                clut,
                vertices,
            } => Some((texture, clut, vertices.as_slice())),
            _ => None,
        })
    }

    pub fn take_calls(&mut self) -> Vec<DriverCall> {
        std::mem::take(&mut self.calls)
    }

    fn ensure_registered(&self, texture: TextureRef) -> Result<(), DriverError> {
        if self.textures.iter().any(|t| t.texture == texture) {
            Ok(())
        } else {
            Err(DriverError::UnknownTexture(texture))
        }
    }
}

impl VideoDriver for RecordingDriver {
    fn create_texture(&mut self, info: &TextureInfo) -> Result<(), DriverError> {
        let attempt = self.creates;
        self.creates += 1;
        if self.fail_create_at == Some(attempt) {
            return Err(DriverError::CreateFailed {
                texture: info.texture,
                reason: "injected failure".into(),
            });
        }
        self.textures.push(*info);
        self.calls.push(DriverCall::CreateTexture(info.texture));
        Ok(())
    }

    fn release_texture(&mut self, texture: TextureRef) {
        self.textures.retain(|t| t.texture != texture);
        self.calls.push(DriverCall::ReleaseTexture(texture));
    }

    fn upload_texture(
        &mut self,
        texture: TextureRef,
        region: AtlasRegion,
        _texels: TexelSlice<'_>,
    ) -> Result<(), DriverError> {
        self.ensure_registered(texture)?;
        if self.fail_uploads {
            return Err(DriverError::UploadFailed {
                texture,
                reason: "injected failure".into(),
            });
        }
        self.calls.push(DriverCall::UploadTexture { texture, region });
        Ok(())
    }

    fn upload_clut(&mut self, _colors: &[u16], clut: ClutRef) -> Result<(), DriverError> {
        self.calls.push(DriverCall::UploadClut(clut));
        Ok(())
    }

    fn blit_texture(
        &mut self,
        texture: TextureRef,
        clut: Option<ClutRef>,
        vertices: &[Vertex],
    ) -> Result<(), DriverError> {
        self.ensure_registered(texture)?;
        self.calls.push(DriverCall::Blit {
            texture,
            clut,
            vertices: vertices.to_vec(),
        });
        Ok(())
    }

    fn scissor(&mut self, rect: Rect) {
        self.calls.push(DriverCall::Scissor(rect));
    }

    fn flush_cache(&mut self, vertices: &[Vertex]) {
        self.calls.push(DriverCall::FlushCache(vertices.len()));
    }

    fn enable_depth_test(&mut self) {
        self.calls.push(DriverCall::EnableDepthTest);
    }

    fn disable_depth_test(&mut self) {
        self.calls.push(DriverCall::DisableDepthTest);
    }

    fn clear_depth_buffer(&mut self) {
        self.calls.push(DriverCall::ClearDepthBuffer);
    }

    fn clear_color_buffer(&mut self) {
        self.calls.push(DriverCall::ClearColorBuffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(layer: LayerId, page: u8) -> TextureInfo {
        TextureInfo {
            texture: TextureRef::new(layer, page),
            width: 512,
            height: 512,
            format: PixelFormat::Indexed,
        }
    }

    #[test]
    fn clut_bank_follows_bank_width() {
        assert_eq!(ClutRef::at(0x0f00, 4096).bank, 0);
        assert_eq!(ClutRef::at(4096 + 0x100, 4096).bank, 1);
        assert_eq!(ClutRef::at(96 * 16, 3072).bank, 0);
    }

    #[test]
    fn registration_rolls_back_in_reverse() {
        let mut driver = RecordingDriver::new();
        driver.fail_create_at = Some(2);
        let textures = [
            info(LayerId::Sprite, 0),
            info(LayerId::Sprite, 1),
            info(LayerId::Sprite, 2),
            info(LayerId::Fix, 0),
        ];

        let err = register_textures(&mut driver, &textures).unwrap_err();
        assert!(matches!(err, DriverError::CreateFailed { .. }));
        assert!(driver.textures().is_empty());
        assert_eq!(
            driver.calls,
            vec![
                DriverCall::CreateTexture(TextureRef::new(LayerId::Sprite, 0)),
                DriverCall::CreateTexture(TextureRef::new(LayerId::Sprite, 1)),
                DriverCall::ReleaseTexture(TextureRef::new(LayerId::Sprite, 1)),
                DriverCall::ReleaseTexture(TextureRef::new(LayerId::Sprite, 0)),
            ]
        );
    }

    #[test]
    fn registration_succeeds_for_all() {
        let mut driver = RecordingDriver::new();
        let textures = [info(LayerId::Object, 0), info(LayerId::Scroll1, 0)];
        register_textures(&mut driver, &textures).unwrap();
        assert_eq!(driver.textures().len(), 2);
    }

    #[test]
    fn unregistered_texture_is_rejected() {
        let mut driver = RecordingDriver::new();
        let texture = TextureRef::new(LayerId::Scroll3, 0);
        assert_eq!(
            driver.blit_texture(texture, None, &[]),
            Err(DriverError::UnknownTexture(texture))
        );
    }
}
