use crate::error::{Error, Result};
use crate::frame::{Channel, Frame, ensure_non_empty};
use crate::shapes::PointF32;
use crate::template::{Landmarks, Template};
use crate::transform::{AffineMatrix, Border, warp_affine};
use image::{Pixel, Rgb};
use tracing::{Level, debug, span, trace};

// twice-triangle-area over squared extent below which points count as a line
const COLLINEAR_RATIO: f64 = 1e-3;
const MIN_EXTENT: f64 = 1e-6;
const MIN_SIGMA: f64 = 1e-3;
const MIN_SCALE: f64 = 1e-9;

/// Working size the keypoints were detected at and the side of the square
/// crop to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarpSize {
    pub working_width: u32,
    pub output_side: u32,
}

impl WarpSize {
    pub fn new(working_width: u32, output_side: u32) -> WarpSize {
        WarpSize {
            working_width,
            output_side,
        }
    }

    /// Uniform factor applied to template points.
    pub fn ratio(&self) -> f32 {
        self.output_side as f32 / self.working_width as f32
    }
}

fn to_f64(p: &PointF32) -> (f64, f64) {
    (p.x as f64, p.y as f64)
}

fn coord(p: &PointF32) -> robust::Coord<f64> {
    (*p).into()
}

fn check_spread(points: &[PointF32]) -> Result<()> {
    if let Some(p) = points.iter().find(|p| !p.is_finite()) {
        return Err(Error::DegenerateGeometry(format!("non-finite keypoint {p:?}")));
    }

    let mut extent_sq: f64 = 0.;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            let (dx, dy) = (a.x as f64 - b.x as f64, a.y as f64 - b.y as f64);
            extent_sq = extent_sq.max(dx * dx + dy * dy);
        }
    }
    if extent_sq.sqrt() < MIN_EXTENT {
        return Err(Error::DegenerateGeometry("keypoints coincide".to_string()));
    }

    let mut max_area: f64 = 0.;
    for i in 0..points.len() {
        for j in i + 1..points.len() {
            for k in j + 1..points.len() {
                let area = robust::orient2d(coord(&points[i]), coord(&points[j]), coord(&points[k]));
                max_area = max_area.max(area.abs());
            }
        }
    }

    let ratio = max_area / extent_sq;
    trace!(ratio, "keypoint spread");
    if ratio < COLLINEAR_RATIO {
        return Err(Error::DegenerateGeometry(format!(
            "keypoints are (near-)collinear (area ratio {ratio:.2e})"
        )));
    }

    Ok(())
}

/// Exact similarity through two correspondences, `None` if the source
/// points coincide.
fn similarity_from_pair(
    (s0, s1): (&PointF32, &PointF32),
    (d0, d1): (&PointF32, &PointF32),
) -> Option<AffineMatrix> {
    let (s0x, s0y) = to_f64(s0);
    let (s1x, s1y) = to_f64(s1);
    let (d0x, d0y) = to_f64(d0);
    let (d1x, d1y) = to_f64(d1);

    let (ux, uy) = (s1x - s0x, s1y - s0y);
    let (vx, vy) = (d1x - d0x, d1y - d0y);
    let norm = ux * ux + uy * uy;
    if norm < MIN_EXTENT * MIN_EXTENT {
        return None;
    }

    let a = (ux * vx + uy * vy) / norm;
    let b = (ux * vy - uy * vx) / norm;
    let tx = d0x - (a * s0x - b * s0y);
    let ty = d0y - (b * s0x + a * s0y);

    Some(AffineMatrix::from_rows([[a, -b, tx], [b, a, ty]]))
}

fn squared_errors(m: &AffineMatrix, src: &[PointF32], dst: &[PointF32]) -> Vec<f64> {
    src.iter()
        .zip(dst)
        .map(|(s, d)| {
            let (x, y) = m.apply_f64(s.x as f64, s.y as f64);
            let (dx, dy) = (x - d.x as f64, y - d.y as f64);
            dx * dx + dy * dy
        })
        .collect()
}

/// Closed-form least-squares similarity over the given correspondences.
fn least_squares_similarity(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<AffineMatrix> {
    let n = src.len() as f64;
    let mean = |pts: &[(f64, f64)]| {
        let (sx, sy) = pts
            .iter()
            .fold((0f64, 0f64), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (msx, msy) = mean(src);
    let (mdx, mdy) = mean(dst);

    let (mut dot, mut cross, mut norm) = (0f64, 0f64, 0f64);
    for ((sx, sy), (dx, dy)) in src.iter().zip(dst) {
        let (xs, ys) = (sx - msx, sy - msy);
        let (xd, yd) = (dx - mdx, dy - mdy);
        dot += xs * xd + ys * yd;
        cross += xs * yd - ys * xd;
        norm += xs * xs + ys * ys;
    }
    if norm < MIN_EXTENT * MIN_EXTENT {
        return None;
    }

    let a = dot / norm;
    let b = cross / norm;
    let tx = mdx - (a * msx - b * msy);
    let ty = mdy - (b * msx + a * msy);

    Some(AffineMatrix::from_rows([[a, -b, tx], [b, a, ty]]))
}

/// Rotation + uniform scale + translation best mapping `src` onto `dst`,
/// robust to a minority of bad correspondences.
///
/// Least-median-of-squares over every two-point minimal sample; the winning
/// model picks the inliers, which are then refit by least squares.
pub fn estimate_partial_affine(src: &[PointF32], dst: &[PointF32]) -> Result<AffineMatrix> {
    let span = span!(Level::DEBUG, "estimate_partial_affine");
    let _guard = span.enter();

    if src.len() != dst.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} source points for {} destination points",
            src.len(),
            dst.len()
        )));
    }
    if src.len() < 3 {
        return Err(Error::DegenerateGeometry(format!(
            "need at least 3 correspondences, got {}",
            src.len()
        )));
    }
    check_spread(src)?;
    check_spread(dst)?;

    let mut best: Option<(f64, AffineMatrix)> = None;
    for i in 0..src.len() {
        for j in i + 1..src.len() {
            let Some(model) = similarity_from_pair((&src[i], &src[j]), (&dst[i], &dst[j])) else {
                continue;
            };

            let mut errors = squared_errors(&model, src, dst);
            errors.sort_by(f64::total_cmp);
            let median = errors[errors.len() / 2];

            if best.is_none_or(|(m, _)| median < m) {
                best = Some((median, model));
            }
        }
    }

    let Some((median, model)) = best else {
        return Err(Error::DegenerateGeometry("no usable point pair".to_string()));
    };

    let count = src.len() as f64;
    let sigma = (2.5 * 1.4826 * (1. + 5. / (count - 2.)) * median.sqrt()).max(MIN_SIGMA);
    let threshold = sigma * sigma;

    let errors = squared_errors(&model, src, dst);
    let (inlier_src, inlier_dst): (Vec<(f64, f64)>, Vec<(f64, f64)>) = errors
        .iter()
        .zip(src.iter().zip(dst))
        .filter(|(err, _)| **err <= threshold)
        .map(|(_, (s, d))| (to_f64(s), to_f64(d)))
        .unzip();
    debug!(median, inliers = inlier_src.len(), "least-median-of-squares fit");

    let refined = if inlier_src.len() >= 2 {
        least_squares_similarity(&inlier_src, &inlier_dst).unwrap_or(model)
    } else {
        model
    };

    if !refined.is_finite() || refined.scale() < MIN_SCALE {
        return Err(Error::DegenerateGeometry(format!(
            "unstable transform {refined:?}"
        )));
    }

    Ok(refined)
}

/// Align `frame` so `keypoints` land on `template`, returning the square
/// crop and the source-to-crop matrix used.
pub fn warp_face<T>(
    frame: &Frame<T>,
    keypoints: &Landmarks,
    template: Template,
    size: WarpSize,
) -> Result<(Frame<T>, AffineMatrix)>
where
    T: Channel,
    Rgb<T>: Pixel<Subpixel = T>,
{
    let span = span!(Level::DEBUG, "warp_face", %template, ?size);
    let _guard = span.enter();

    ensure_non_empty(frame, "source frame")?;
    if size.working_width == 0 || size.output_side == 0 {
        return Err(Error::InvalidParameter(format!(
            "warp size must be non-zero, got {size:?}"
        )));
    }

    let normed_template = template.scaled(size.ratio());
    let affine_matrix = estimate_partial_affine(keypoints, &normed_template)?;
    let crop = warp_affine(
        frame,
        &affine_matrix,
        size.output_side,
        size.output_side,
        Border::Replicate,
    )?;

    Ok((crop, affine_matrix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::{Rgb, RgbImage};

    fn assert_matrix_eq(actual: &AffineMatrix, expected: &AffineMatrix, epsilon: f64) {
        for (row, expected_row) in actual.m.iter().zip(expected.m.iter()) {
            for (v, e) in row.iter().zip(expected_row) {
                assert_abs_diff_eq!(*v, *e, epsilon = epsilon);
            }
        }
    }

    fn textured(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x * 7 + y * 3) % 256) as u8])
        })
    }

    #[test]
    fn test_template_onto_itself_is_identity() {
        for t in Template::ALL {
            let side = t.reference_size();
            let kps = t.points();
            let m = estimate_partial_affine(&kps, &t.scaled(1.)).unwrap();
            assert_matrix_eq(&m, &AffineMatrix::identity(), 1e-4);

            let frame = textured(side + 20, side + 10);
            let (crop, matrix) = warp_face(&frame, &kps, t, WarpSize::new(side, side)).unwrap();
            assert_eq!(crop.dimensions(), (side, side));
            assert_abs_diff_eq!(matrix.scale(), 1., epsilon = 1e-4);
            assert_abs_diff_eq!(matrix.rotation(), 0., epsilon = 1e-4);

            for (x, y, px) in crop.enumerate_pixels() {
                let expected = frame.get_pixel(x, y);
                for c in 0..3 {
                    assert!(
                        (px.0[c] as i32 - expected.0[c] as i32).abs() <= 1,
                        "{t} ({x}, {y})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_output_side_scales_template() {
        let t = Template::ArcfaceV2;
        let kps = t.points();
        let frame = textured(120, 120);

        let (crop, matrix) = warp_face(&frame, &kps, t, WarpSize::new(112, 224)).unwrap();
        assert_eq!(crop.dimensions(), (224, 224));
        assert_abs_diff_eq!(matrix.scale(), 2., epsilon = 1e-4);

        let mapped = matrix.transform_points(&kps);
        for (m, e) in mapped.iter().zip(t.scaled(2.)) {
            assert_abs_diff_eq!(m.x, e.x, epsilon = 1e-2);
            assert_abs_diff_eq!(m.y, e.y, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_recovers_known_similarity() {
        let template = Template::ArcfaceV1.points();
        let forward = AffineMatrix::similarity(2.3, 0.35, 140., 60.);
        let kps: Landmarks = template.map(|p| forward.apply(p));

        let m = estimate_partial_affine(&kps, &template).unwrap();
        assert_matrix_eq(&m, &forward.invert().unwrap(), 1e-3);
    }

    #[test]
    fn test_tolerates_one_noisy_landmark() {
        let template = Template::ArcfaceV2.points();
        let mut kps = template;
        kps[2].x += 25.;
        kps[2].y -= 18.;

        let m = estimate_partial_affine(&kps, &template).unwrap();
        assert_matrix_eq(&m, &AffineMatrix::identity(), 1e-3);
    }

    #[test]
    fn test_collinear_keypoints() {
        let kps: Landmarks = [0., 10., 20., 30., 40.].map(|v| PointF32::new(v, v * 0.5));
        let template = Template::Ffhq.points();
        let frame = textured(64, 64);

        assert!(matches!(
            estimate_partial_affine(&kps, &template),
            Err(Error::DegenerateGeometry(_))
        ));
        assert!(matches!(
            warp_face(&frame, &kps, Template::Ffhq, WarpSize::new(512, 512)),
            Err(Error::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_coincident_and_non_finite_keypoints() {
        let template = Template::ArcfaceV1.points();
        let kps = [PointF32::new(5., 5.); 5];
        assert!(matches!(
            estimate_partial_affine(&kps, &template),
            Err(Error::DegenerateGeometry(_))
        ));

        let mut kps = template;
        kps[0].x = f32::NAN;
        assert!(matches!(
            estimate_partial_affine(&kps, &template),
            Err(Error::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_invalid_size() {
        let frame = textured(16, 16);
        let kps = Template::ArcfaceV1.points();
        assert!(matches!(
            warp_face(&frame, &kps, Template::ArcfaceV1, WarpSize::new(0, 112)),
            Err(Error::InvalidParameter(_))
        ));

        let empty = RgbImage::new(0, 0);
        assert!(matches!(
            warp_face(&empty, &kps, Template::ArcfaceV1, WarpSize::new(112, 112)),
            Err(Error::InvalidFrame(_))
        ));
    }
}
