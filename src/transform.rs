use crate::error::{Error, Result};
use crate::frame::{Channel, Frame, Mask, ensure_non_empty};
use crate::shapes::PointF32;
use image::{ImageBuffer, Luma, Pixel, Rgb};
use tracing::{Level, span};

const SINGULAR_EPS: f64 = 1e-12;

/// 2x3 affine transform `[a b tx; c d ty]` mapping `(x, y)` to
/// `(a*x + b*y + tx, c*x + d*y + ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    pub m: [[f64; 3]; 2],
}

impl Default for AffineMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineMatrix {
    pub fn identity() -> AffineMatrix {
        AffineMatrix {
            m: [[1., 0., 0.], [0., 1., 0.]],
        }
    }

    pub fn from_rows(m: [[f64; 3]; 2]) -> AffineMatrix {
        AffineMatrix { m }
    }

    pub fn translation(tx: f64, ty: f64) -> AffineMatrix {
        AffineMatrix {
            m: [[1., 0., tx], [0., 1., ty]],
        }
    }

    /// Rotation by `theta` radians with uniform `scale`, then translation.
    pub fn similarity(scale: f64, theta: f64, tx: f64, ty: f64) -> AffineMatrix {
        let a = scale * theta.cos();
        let b = scale * theta.sin();
        AffineMatrix {
            m: [[a, -b, tx], [b, a, ty]],
        }
    }

    pub fn determinant(&self) -> f64 {
        self.m[0][0] * self.m[1][1] - self.m[0][1] * self.m[1][0]
    }

    /// Uniform scale of the linear part (exact for similarity transforms).
    pub fn scale(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    pub fn rotation(&self) -> f64 {
        self.m[1][0].atan2(self.m[0][0])
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().flatten().all(|v| v.is_finite())
    }

    pub fn apply_f64(&self, x: f64, y: f64) -> (f64, f64) {
        let [[a, b, tx], [c, d, ty]] = self.m;
        (a * x + b * y + tx, c * x + d * y + ty)
    }

    pub fn apply(&self, p: PointF32) -> PointF32 {
        let (x, y) = self.apply_f64(p.x as f64, p.y as f64);
        PointF32 {
            x: x as f32,
            y: y as f32,
        }
    }

    pub fn transform_points(&self, points: &[PointF32]) -> Vec<PointF32> {
        points.iter().map(|p| self.apply(*p)).collect()
    }

    pub fn invert(&self) -> Result<AffineMatrix> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPS || !self.is_finite() {
            return Err(Error::SingularMatrix { det });
        }

        let [[a, b, tx], [c, d, ty]] = self.m;
        let inv_a = d / det;
        let inv_b = -b / det;
        let inv_c = -c / det;
        let inv_d = a / det;

        Ok(AffineMatrix {
            m: [
                [inv_a, inv_b, -(inv_a * tx + inv_b * ty)],
                [inv_c, inv_d, -(inv_c * tx + inv_d * ty)],
            ],
        })
    }

    /// `self` applied after `other`.
    pub fn compose(&self, other: &AffineMatrix) -> AffineMatrix {
        let [[a, b, tx], [c, d, ty]] = self.m;
        let [[e, f, ux], [g, h, uy]] = other.m;
        AffineMatrix {
            m: [
                [a * e + b * g, a * f + b * h, a * ux + b * uy + tx],
                [c * e + d * g, c * f + d * h, c * ux + d * uy + ty],
            ],
        }
    }
}

/// What out-of-bounds taps read during warping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Border {
    /// Nearest edge pixel.
    Replicate,
    /// Fixed value in every channel.
    Constant(f32),
}

/// Bilinear backward-mapping warp over a `src_w x src_h` source read through
/// `fetch`. Output pixel `(x, y)` samples the source at `inverse * (x, y)`;
/// pixel centres sit on integer coordinates.
fn warp_pixels<const C: usize>(
    src_w: u32,
    src_h: u32,
    fetch: impl Fn(u32, u32) -> [f32; C],
    inverse: &AffineMatrix,
    width: u32,
    height: u32,
    border: Border,
) -> Vec<[f32; C]> {
    let max_x = src_w as i64 - 1;
    let max_y = src_h as i64 - 1;

    let tap = |x: i64, y: i64| -> [f32; C] {
        if (0..=max_x).contains(&x) && (0..=max_y).contains(&y) {
            return fetch(x as u32, y as u32);
        }
        match border {
            Border::Replicate => fetch(x.clamp(0, max_x) as u32, y.clamp(0, max_y) as u32),
            Border::Constant(v) => [v; C],
        }
    };

    let mut out = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = inverse.apply_f64(x as f64, y as f64);
            // past one pixel outside, every tap is a border read anyway
            let sx = sx.clamp(-1., src_w as f64);
            let sy = sy.clamp(-1., src_h as f64);
            let (x0, y0) = (sx.floor(), sy.floor());
            let (fx, fy) = ((sx - x0) as f32, (sy - y0) as f32);
            let (x0, y0) = (x0 as i64, y0 as i64);

            let p00 = tap(x0, y0);
            let p10 = tap(x0 + 1, y0);
            let p01 = tap(x0, y0 + 1);
            let p11 = tap(x0 + 1, y0 + 1);

            let mut px = [0f32; C];
            for c in 0..C {
                let top = p00[c] + (p10[c] - p00[c]) * fx;
                let bottom = p01[c] + (p11[c] - p01[c]) * fx;
                px[c] = top + (bottom - top) * fy;
            }
            out.push(px);
        }
    }

    out
}

/// Warp `src` by `matrix` (source to destination) into a
/// `width x height` frame.
pub fn warp_affine<T>(
    src: &Frame<T>,
    matrix: &AffineMatrix,
    width: u32,
    height: u32,
    border: Border,
) -> Result<Frame<T>>
where
    T: Channel,
    Rgb<T>: Pixel<Subpixel = T>,
{
    let span = span!(Level::TRACE, "warp_affine", width, height);
    let _guard = span.enter();

    ensure_non_empty(src, "warp source")?;
    let inverse = matrix.invert()?;
    let pixels = warp_pixels(
        src.width(),
        src.height(),
        |x, y| src.get_pixel(x, y).0.map(T::to_sample),
        &inverse,
        width,
        height,
        border,
    );

    let mut out: Frame<T> = ImageBuffer::new(width, height);
    for (dst, px) in out.pixels_mut().zip(pixels) {
        *dst = Rgb(px.map(T::from_sample));
    }

    Ok(out)
}

/// Single-channel variant of [`warp_affine`] for blend masks.
pub fn warp_mask(
    src: &Mask,
    matrix: &AffineMatrix,
    width: u32,
    height: u32,
    border: Border,
) -> Result<Mask> {
    if src.width() == 0 || src.height() == 0 {
        return Err(Error::InvalidFrame("mask has zero size".to_string()));
    }
    let inverse = matrix.invert()?;
    let pixels = warp_pixels(
        src.width(),
        src.height(),
        |x, y| src.get_pixel(x, y).0,
        &inverse,
        width,
        height,
        border,
    );

    let mut out = Mask::new(width, height);
    for (dst, px) in out.pixels_mut().zip(pixels) {
        *dst = Luma(px);
    }

    Ok(out)
}
