use crate::cache::KeyedCache;
use crate::error::{Error, Result};
use crate::frame::{Channel, Frame, Mask, ensure_non_empty};
use crate::transform::{AffineMatrix, Border, warp_affine, warp_mask};
use image::{Luma, Pixel, Rgb};
use imageproc::filter::gaussian_blur_f32;
use std::sync::Arc;
use tracing::{Level, span, trace};

/// Fraction of the crop left fully transparent on each side.
///
/// Top and bottom are fractions of the crop width, left and right of the
/// crop height.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Padding {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Padding {
    pub fn new(top: f64, right: f64, bottom: f64, left: f64) -> Padding {
        Padding {
            top,
            right,
            bottom,
            left,
        }
    }

    fn sides(&self) -> [f64; 4] {
        [self.top, self.right, self.bottom, self.left]
    }
}

impl From<[f64; 4]> for Padding {
    fn from([top, right, bottom, left]: [f64; 4]) -> Padding {
        Padding {
            top,
            right,
            bottom,
            left,
        }
    }
}

/// Exact mask parameters. Floats are keyed by bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaskKey {
    pub width: u32,
    pub height: u32,
    blur_bits: u64,
    padding_bits: [u64; 4],
}

impl MaskKey {
    pub fn new(width: u32, height: u32, blur: f64, padding: Padding) -> Result<MaskKey> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameter(format!(
                "mask size must be non-zero, got {width}x{height}"
            )));
        }
        if !blur.is_finite() || blur < 0. {
            return Err(Error::InvalidParameter(format!(
                "blur ratio must be finite and non-negative, got {blur}"
            )));
        }
        if padding.sides().iter().any(|p| !p.is_finite() || *p < 0.) {
            return Err(Error::InvalidParameter(format!(
                "padding must be finite and non-negative, got {padding:?}"
            )));
        }

        // -0.0 and 0.0 are the same mask
        let bits = |v: f64| (v + 0.).to_bits();
        Ok(MaskKey {
            width,
            height,
            blur_bits: bits(blur),
            padding_bits: padding.sides().map(bits),
        })
    }

    pub fn blur(&self) -> f64 {
        f64::from_bits(self.blur_bits)
    }

    pub fn padding(&self) -> Padding {
        self.padding_bits.map(f64::from_bits).into()
    }
}

/// Blur amount and zeroed band thickness per side, before smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MaskLayout {
    blur_amount: u32,
    top: u32,
    right: u32,
    bottom: u32,
    left: u32,
}

impl MaskLayout {
    fn new(key: &MaskKey) -> MaskLayout {
        let (width, height) = (key.width, key.height);
        let padding = key.padding();

        let blur_amount = (height as f64 * 0.5 * key.blur()).floor() as u32;
        let blur_area = (blur_amount / 2).max(1);

        let band = |pad: f64, extent: u32| -> u32 {
            let padded = (pad * extent as f64).floor() as u32;
            if blur_amount > 0 {
                blur_area.max(padded)
            } else if pad > 0. {
                padded.max(1)
            } else {
                0
            }
        };

        MaskLayout {
            blur_amount,
            top: band(padding.top, width).min(height),
            right: band(padding.right, height).min(width),
            bottom: band(padding.bottom, width).min(height),
            left: band(padding.left, height).min(width),
        }
    }
}

/// Build the feathered mask for `key`.
///
/// Starts fully opaque, zeroes a band on every side, then blurs when the
/// blur amount is non-zero. A band is at least the half blur amount (when
/// blurring) and at least the side's padding times its span.
pub fn create_static_mask(key: MaskKey) -> Mask {
    let span = span!(Level::DEBUG, "create_static_mask", ?key);
    let _guard = span.enter();

    let (width, height) = (key.width, key.height);
    let MaskLayout {
        blur_amount,
        top,
        right,
        bottom,
        left,
    } = MaskLayout::new(&key);
    trace!(blur_amount, top, right, bottom, left, "mask bands");

    let mask = Mask::from_fn(width, height, |x, y| {
        let inside = y >= top && y < height - bottom && x >= left && x < width - right;
        Luma([if inside { 1. } else { 0. }])
    });

    if blur_amount == 0 {
        return mask;
    }

    let mut blurred = gaussian_blur_f32(&mask, blur_amount as f32 * 0.25);
    for px in blurred.pixels_mut() {
        px.0[0] = px.0[0].clamp(0., 1.);
    }
    blurred
}

pub struct MaskCache {
    cache: KeyedCache<MaskKey, Mask>,
}

impl MaskCache {
    pub fn new(capacity: usize) -> MaskCache {
        MaskCache {
            cache: KeyedCache::new("masks", capacity),
        }
    }

    pub fn mask(&self, key: MaskKey) -> Arc<Mask> {
        self.cache.get_or_insert_with(key, || create_static_mask(key))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    pub fn clear(&self) {
        self.cache.clear()
    }
}

/// Composite `crop` back into a copy of `original` through the inverse of
/// `affine_matrix`, weighting by a feathered mask from `masks`.
pub fn paste_back<T>(
    original: &Frame<T>,
    crop: &Frame<T>,
    affine_matrix: &AffineMatrix,
    blur: f64,
    padding: Padding,
    masks: &MaskCache,
) -> Result<Frame<T>>
where
    T: Channel,
    Rgb<T>: Pixel<Subpixel = T>,
{
    let span = span!(Level::DEBUG, "paste_back", blur);
    let _guard = span.enter();

    let inverse_matrix = affine_matrix.invert()?;
    ensure_non_empty(original, "original frame")?;
    ensure_non_empty(crop, "crop")?;

    let mask = masks.mask(MaskKey::new(crop.width(), crop.height(), blur, padding)?);
    blend_inverse(original, crop, &inverse_matrix, &mask)
}

fn blend_inverse<T>(
    original: &Frame<T>,
    crop: &Frame<T>,
    inverse_matrix: &AffineMatrix,
    mask: &Mask,
) -> Result<Frame<T>>
where
    T: Channel,
    Rgb<T>: Pixel<Subpixel = T>,
{
    let (width, height) = original.dimensions();

    let inverse_mask = warp_mask(mask, inverse_matrix, width, height, Border::Constant(0.))?;
    let inverse_crop = warp_affine(crop, inverse_matrix, width, height, Border::Replicate)?;

    let mut paste_frame = original.clone();
    for ((dst, crop_px), weight) in paste_frame
        .pixels_mut()
        .zip(inverse_crop.pixels())
        .zip(inverse_mask.pixels())
    {
        let m = weight.0[0].clamp(0., 1.);
        let px: [T; 3] = std::array::from_fn(|c| {
            T::from_sample(m * crop_px.0[c].to_sample() + (1. - m) * dst.0[c].to_sample())
        });
        *dst = Rgb(px);
    }

    Ok(paste_frame)
}
