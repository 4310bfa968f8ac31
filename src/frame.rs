use crate::error::{Error, Result};
use image::{ImageBuffer, Luma, Pixel, Primitive, Rgb};

/// Dense row-major 3-channel pixel buffer.
pub type Frame<T> = ImageBuffer<Rgb<T>, Vec<T>>;

/// Single-channel blend weights in `[0, 1]`.
pub type Mask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A pixel component the engine can sample and blend in f32.
///
/// `image` only implements `Pixel` for `Rgb<T>` over its own sealed set of
/// subpixels, so generic code also bounds `Rgb<T>: Pixel<Subpixel = T>`.
pub trait Channel: Primitive + Send + Sync + 'static {
    fn to_sample(self) -> f32;
    fn from_sample(v: f32) -> Self;
}

impl Channel for u8 {
    fn to_sample(self) -> f32 {
        self as f32
    }

    // round half away from zero, then saturate; never truncates
    fn from_sample(v: f32) -> Self {
        v.round().clamp(0., 255.) as u8
    }
}

impl Channel for f32 {
    fn to_sample(self) -> f32 {
        self
    }

    fn from_sample(v: f32) -> Self {
        v
    }
}

pub fn ensure_non_empty<T>(frame: &Frame<T>, what: &str) -> Result<()>
where
    T: Channel,
    Rgb<T>: Pixel<Subpixel = T>,
{
    if frame.width() == 0 || frame.height() == 0 {
        return Err(Error::InvalidFrame(format!(
            "{what} has zero size ({}x{})",
            frame.width(),
            frame.height()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_u8_samples_round_and_saturate() {
        assert_eq!(u8::from_sample(127.4), 127);
        assert_eq!(u8::from_sample(127.6), 128);
        assert_eq!(u8::from_sample(-3.), 0);
        assert_eq!(u8::from_sample(300.), 255);
        assert_eq!(200u8.to_sample(), 200.);
    }

    #[test]
    fn test_ensure_non_empty() {
        assert!(ensure_non_empty(&RgbImage::new(2, 1), "frame").is_ok());
        assert!(matches!(
            ensure_non_empty(&Frame::<f32>::new(0, 4), "frame"),
            Err(Error::InvalidFrame(_))
        ));
    }
}
