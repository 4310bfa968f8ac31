use crate::error::{Error, Result};
use crate::shapes::{Bbox, PointF32};
use crate::template::{LANDMARK_COUNT, Landmarks};
use ndarray::{ArrayView1, ArrayView2, Axis};
use tracing::{Level, span, trace};

pub use anchors::{AnchorCache, AnchorKey, gen_anchors};

mod anchors;

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: Bbox,
    pub keypoints: Vec<PointF32>,
    pub score: f32,
}

impl Detection {
    /// The keypoints as a fixed 5-point set, ready for alignment.
    pub fn landmarks(&self) -> Result<Landmarks> {
        <Landmarks>::try_from(self.keypoints.as_slice()).map_err(|_| {
            Error::ShapeMismatch(format!(
                "detection has {} keypoints, alignment needs {LANDMARK_COUNT}",
                self.keypoints.len()
            ))
        })
    }
}

fn check_rows(points: &ArrayView2<f32>, distance: &ArrayView2<f32>) -> Result<()> {
    if points.nrows() != distance.nrows() {
        return Err(Error::ShapeMismatch(format!(
            "{} anchor points but {} distance rows",
            points.nrows(),
            distance.nrows()
        )));
    }
    if points.ncols() < 2 {
        return Err(Error::ShapeMismatch(format!(
            "anchor points need 2 columns, got {}",
            points.ncols()
        )));
    }

    Ok(())
}

/// `(left, top, right, bottom)` distances from each anchor to box corners.
pub fn distance_to_bbox(points: ArrayView2<f32>, distance: ArrayView2<f32>) -> Result<Vec<Bbox>> {
    check_rows(&points, &distance)?;
    if distance.ncols() < 4 {
        return Err(Error::ShapeMismatch(format!(
            "bbox distances need 4 columns, got {}",
            distance.ncols()
        )));
    }

    Ok(points
        .rows()
        .into_iter()
        .zip(distance.rows())
        .map(|(p, d)| Bbox {
            x1: p[0] - d[0],
            y1: p[1] - d[1],
            x2: p[0] + d[2],
            y2: p[1] + d[3],
        })
        .collect())
}

/// Interleaved `(dx, dy)` offsets per landmark slot, relative to the anchor.
pub fn distance_to_keypoints(
    points: ArrayView2<f32>,
    distance: ArrayView2<f32>,
) -> Result<Vec<Vec<PointF32>>> {
    check_rows(&points, &distance)?;
    if distance.ncols() % 2 != 0 {
        return Err(Error::ShapeMismatch(format!(
            "keypoint distances must interleave x and y, got {} columns",
            distance.ncols()
        )));
    }

    Ok(points
        .rows()
        .into_iter()
        .zip(distance.rows())
        .map(|(p, d)| {
            d.exact_chunks(2)
                .into_iter()
                .map(|offset| PointF32 {
                    x: p[0] + offset[0],
                    y: p[1] + offset[1],
                })
                .collect()
        })
        .collect())
}

/// Decode one detector output level into scored detections.
///
/// Raw distances are in units of the level's stride. Rows scoring below
/// `score_threshold` are dropped before decoding.
pub fn decode_detections(
    anchors: ArrayView2<f32>,
    scores: ArrayView1<f32>,
    bbox_distances: ArrayView2<f32>,
    kps_distances: ArrayView2<f32>,
    feature_stride: u32,
    score_threshold: f32,
) -> Result<Vec<Detection>> {
    let span = span!(Level::DEBUG, "decode_detections", feature_stride);
    let _guard = span.enter();

    if scores.len() != anchors.nrows() {
        return Err(Error::ShapeMismatch(format!(
            "{} scores for {} anchors",
            scores.len(),
            anchors.nrows()
        )));
    }

    let keep: Vec<usize> = scores
        .iter()
        .enumerate()
        .filter(|(_, s)| **s >= score_threshold)
        .map(|(i, _)| i)
        .collect();

    check_rows(&anchors, &bbox_distances)?;
    check_rows(&anchors, &kps_distances)?;

    let stride = feature_stride as f32;
    let points = anchors.select(Axis(0), &keep);
    let bbox_distances = bbox_distances.select(Axis(0), &keep) * stride;
    let kps_distances = kps_distances.select(Axis(0), &keep) * stride;

    let bboxes = distance_to_bbox(points.view(), bbox_distances.view())?;
    let keypoints = distance_to_keypoints(points.view(), kps_distances.view())?;

    let detections: Vec<Detection> = keep
        .iter()
        .zip(bboxes)
        .zip(keypoints)
        .map(|((&idx, bbox), keypoints)| Detection {
            bbox,
            keypoints,
            score: scores[idx],
        })
        .collect();

    trace!("{} of {} anchors above threshold", detections.len(), scores.len());
    Ok(detections)
}

/// Greedy non-maximum suppression, highest score first.
pub fn apply_nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for d in detections {
        if keep.iter().all(|k| k.bbox.iou(&d.bbox) <= iou_threshold) {
            keep.push(d);
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn test_distance_to_bbox() {
        let points = array![[10., 10.]];
        let distance = array![[1., 2., 3., 4.]];

        let bboxes = distance_to_bbox(points.view(), distance.view()).unwrap();
        assert_eq!(bboxes, vec![Bbox::new(9., 8., 13., 14.)]);
    }

    #[test]
    fn test_distance_to_bbox_many_rows() {
        let points = array![[0., 0.], [8., 16.]];
        let distance = array![[1., 1., 1., 1.], [2., 4., 6., 8.]];

        let bboxes = distance_to_bbox(points.view(), distance.view()).unwrap();
        assert_eq!(
            bboxes,
            vec![Bbox::new(-1., -1., 1., 1.), Bbox::new(6., 12., 14., 24.)]
        );
    }

    #[test]
    fn test_distance_to_keypoints() {
        let points = array![[10., 20.], [0., 0.]];
        let distance = array![[1., 2., -3., -4.], [5., 6., 7., 8.]];

        let kps = distance_to_keypoints(points.view(), distance.view()).unwrap();
        assert_eq!(
            kps,
            vec![
                vec![PointF32::new(11., 22.), PointF32::new(7., 16.)],
                vec![PointF32::new(5., 6.), PointF32::new(7., 8.)],
            ]
        );
    }

    #[test]
    fn test_mismatched_rows() {
        let points = array![[10., 10.], [20., 20.]];
        let distance = array![[1., 2., 3., 4.]];

        assert!(matches!(
            distance_to_bbox(points.view(), distance.view()),
            Err(Error::ShapeMismatch(_))
        ));

        let distance = array![[1., 2.]];
        assert!(matches!(
            distance_to_keypoints(points.view(), distance.view()),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_bad_columns() {
        let points = array![[10., 10.]];
        assert!(matches!(
            distance_to_bbox(points.view(), array![[1., 2., 3.]].view()),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(matches!(
            distance_to_keypoints(points.view(), array![[1., 2., 3.]].view()),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_decode_detections() {
        let anchors = gen_anchors(AnchorKey::new(8, 1, 1, 2));
        let scores = array![0.2, 0.9];
        let bbox_distances = array![[1., 1., 1., 1.], [1., 2., 3., 4.]];
        let mut kps_distances = Array2::<f32>::zeros((2, 10));
        kps_distances[[1, 0]] = 0.5;
        kps_distances[[1, 9]] = -1.;

        let detections = decode_detections(
            anchors.view(),
            scores.view(),
            bbox_distances.view(),
            kps_distances.view(),
            8,
            0.5,
        )
        .unwrap();

        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(d.score, 0.9);
        assert_eq!(d.bbox, Bbox::new(0., -16., 32., 32.));
        let landmarks = d.landmarks().unwrap();
        assert_eq!(landmarks[0], PointF32::new(12., 0.));
        assert_eq!(landmarks[4], PointF32::new(8., -8.));
    }

    #[test]
    fn test_decode_detections_score_mismatch() {
        let anchors = gen_anchors(AnchorKey::new(8, 1, 1, 2));
        let res = decode_detections(
            anchors.view(),
            array![0.9].view(),
            Array2::zeros((2, 4)).view(),
            Array2::zeros((2, 10)).view(),
            8,
            0.5,
        );
        assert!(matches!(res, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_landmarks_wrong_count() {
        let d = Detection {
            bbox: Bbox::default(),
            keypoints: vec![PointF32::default(); 3],
            score: 1.,
        };
        assert!(matches!(d.landmarks(), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_nms() {
        let make = |x: f32, score: f32| Detection {
            bbox: Bbox::new(x, 0., x + 10., 10.),
            keypoints: Vec::new(),
            score,
        };
        let detections = vec![make(0., 0.7), make(1., 0.9), make(50., 0.8)];

        let kept = apply_nms(detections, 0.4);
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.8]);
    }
}
