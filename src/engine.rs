use crate::align::{WarpSize, warp_face};
use crate::composite::{MaskCache, MaskKey, Padding, paste_back};
use crate::detection::{AnchorCache, AnchorKey, Detection, decode_detections};
use crate::error::Result;
use crate::frame::{Channel, Frame, Mask};
use crate::template::{Landmarks, Template};
use crate::transform::AffineMatrix;
use image::{Pixel, Rgb};
use ndarray::{Array2, ArrayView1, ArrayView2};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub mask_cache_capacity: usize,
    pub anchor_cache_capacity: usize,
    /// Blur ratio used by [`FaceEngine::paste_back_default`].
    pub blur: f64,
    /// Padding used by [`FaceEngine::paste_back_default`].
    pub padding: Padding,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mask_cache_capacity: 256,
            anchor_cache_capacity: 64,
            blur: 0.3,
            padding: Padding::default(),
        }
    }
}

/// Owns the mask and anchor caches and exposes the alignment and
/// compositing operations over them. Share it across threads with `Arc`.
pub struct FaceEngine {
    config: EngineConfig,
    masks: MaskCache,
    anchors: AnchorCache,
}

impl Default for FaceEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl FaceEngine {
    pub fn new(config: EngineConfig) -> FaceEngine {
        debug!(?config, "Creating face engine");
        FaceEngine {
            masks: MaskCache::new(config.mask_cache_capacity),
            anchors: AnchorCache::new(config.anchor_cache_capacity),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mask_cache(&self) -> &MaskCache {
        &self.masks
    }

    pub fn anchor_cache(&self) -> &AnchorCache {
        &self.anchors
    }

    pub fn warp_face<T>(
        &self,
        frame: &Frame<T>,
        keypoints: &Landmarks,
        template_name: &str,
        size: WarpSize,
    ) -> Result<(Frame<T>, AffineMatrix)>
    where
        T: Channel,
        Rgb<T>: Pixel<Subpixel = T>,
    {
        let template: Template = template_name.parse()?;
        warp_face(frame, keypoints, template, size)
    }

    pub fn paste_back<T>(
        &self,
        original: &Frame<T>,
        crop: &Frame<T>,
        affine_matrix: &AffineMatrix,
        blur: f64,
        padding: Padding,
    ) -> Result<Frame<T>>
    where
        T: Channel,
        Rgb<T>: Pixel<Subpixel = T>,
    {
        paste_back(original, crop, affine_matrix, blur, padding, &self.masks)
    }

    pub fn paste_back_default<T>(
        &self,
        original: &Frame<T>,
        crop: &Frame<T>,
        affine_matrix: &AffineMatrix,
    ) -> Result<Frame<T>>
    where
        T: Channel,
        Rgb<T>: Pixel<Subpixel = T>,
    {
        self.paste_back(
            original,
            crop,
            affine_matrix,
            self.config.blur,
            self.config.padding,
        )
    }

    pub fn mask(&self, width: u32, height: u32, blur: f64, padding: Padding) -> Result<Arc<Mask>> {
        Ok(self.masks.mask(MaskKey::new(width, height, blur, padding)?))
    }

    pub fn anchors(
        &self,
        feature_stride: u32,
        anchor_total: u32,
        stride_height: u32,
        stride_width: u32,
    ) -> Arc<Array2<f32>> {
        self.anchors.anchors(AnchorKey::new(
            feature_stride,
            anchor_total,
            stride_height,
            stride_width,
        ))
    }

    /// Decode one detector level against its cached anchor grid.
    pub fn decode_level(
        &self,
        key: AnchorKey,
        scores: ArrayView1<f32>,
        bbox_distances: ArrayView2<f32>,
        kps_distances: ArrayView2<f32>,
        score_threshold: f32,
    ) -> Result<Vec<Detection>> {
        let anchors = self.anchors.anchors(key);
        decode_detections(
            anchors.view(),
            scores,
            bbox_distances,
            kps_distances,
            key.feature_stride,
            score_threshold,
        )
    }
}
