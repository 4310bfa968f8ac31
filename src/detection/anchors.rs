use crate::cache::KeyedCache;
use ndarray::Array2;
use std::sync::Arc;
use tracing::{Level, span, trace};

/// Parameters of one detector output level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorKey {
    pub feature_stride: u32,
    pub anchor_total: u32,
    pub stride_height: u32,
    pub stride_width: u32,
}

impl AnchorKey {
    pub fn new(
        feature_stride: u32,
        anchor_total: u32,
        stride_height: u32,
        stride_width: u32,
    ) -> AnchorKey {
        AnchorKey {
            feature_stride,
            anchor_total,
            stride_height,
            stride_width,
        }
    }

    /// Grid for an input of `input_height` x `input_width` pixels.
    pub fn for_input(
        feature_stride: u32,
        anchor_total: u32,
        input_height: u32,
        input_width: u32,
    ) -> AnchorKey {
        AnchorKey {
            feature_stride,
            anchor_total,
            stride_height: input_height / feature_stride.max(1),
            stride_width: input_width / feature_stride.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.stride_height as usize * self.stride_width as usize * self.anchor_total as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anchor centres as an `N x 2` array of `(x, y)` rows.
///
/// Cells are visited row by row; each cell's point is emitted
/// `anchor_total` times in a row before moving on. Coordinates are the
/// cell's column/row index times `feature_stride`.
pub fn gen_anchors(key: AnchorKey) -> Array2<f32> {
    let span = span!(Level::DEBUG, "gen_anchors", ?key);
    let _guard = span.enter();

    let stride = key.feature_stride as f32;
    let anchor_total = key.anchor_total as usize;
    let strides_per_row = key.stride_width as usize;

    let anchors = Array2::from_shape_fn((key.len(), 2), |(idx, coord)| {
        let cell = idx / anchor_total;
        let (row_num, col_num) = (cell / strides_per_row, cell % strides_per_row);
        match coord {
            0 => col_num as f32 * stride,
            _ => row_num as f32 * stride,
        }
    });

    trace!("Generated {} anchors", key.len());
    anchors
}

pub struct AnchorCache {
    cache: KeyedCache<AnchorKey, Array2<f32>>,
}

impl AnchorCache {
    pub fn new(capacity: usize) -> AnchorCache {
        AnchorCache {
            cache: KeyedCache::new("anchors", capacity),
        }
    }

    pub fn anchors(&self, key: AnchorKey) -> Arc<Array2<f32>> {
        self.cache.get_or_insert_with(key, || gen_anchors(key))
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

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    #[test]
    fn test_two_by_two_grid_two_anchors() {
        let anchors = gen_anchors(AnchorKey::new(8, 2, 2, 2));

        let expected: Array2<f32> = array![
            [0., 0.],
            [0., 0.],
            [8., 0.],
            [8., 0.],
            [0., 8.],
            [0., 8.],
            [8., 8.],
            [8., 8.],
        ];
        assert_eq!(anchors, expected);
    }

    #[test]
    fn test_non_square_grid_is_x_y() {
        // 1 row, 3 columns: x advances, y stays put
        let anchors = gen_anchors(AnchorKey::new(16, 1, 1, 3));
        let expected: Array2<f32> = array![[0., 0.], [16., 0.], [32., 0.]];
        assert_eq!(anchors, expected);

        // 3 rows, 1 column
        let anchors = gen_anchors(AnchorKey::new(16, 1, 3, 1));
        let expected: Array2<f32> = array![[0., 0.], [0., 16.], [0., 32.]];
        assert_eq!(anchors, expected);
    }

    #[test]
    fn test_empty_grid() {
        let anchors = gen_anchors(AnchorKey::new(8, 0, 4, 4));
        assert_eq!(anchors.nrows(), 0);
        assert_eq!(anchors.ncols(), 2);
    }

    #[test]
    fn test_for_input() {
        let key = AnchorKey::for_input(32, 2, 640, 640);
        assert_eq!(key, AnchorKey::new(32, 2, 20, 20));
        assert_eq!(key.len(), 800);
    }

    #[test]
    fn test_cache_is_idempotent() {
        let cache = AnchorCache::new(4);
        let key = AnchorKey::new(8, 2, 80, 80);
        let a = cache.anchors(key);
        let b = cache.anchors(key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, gen_anchors(key));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_concurrent_first_use() {
        let cache = AnchorCache::new(4);
        let key = AnchorKey::new(16, 2, 40, 40);
        let expected = gen_anchors(key);

        let results: Vec<Arc<Array2<f32>>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..6).map(|_| s.spawn(|| cache.anchors(key))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.len(), 1);
        for r in results {
            assert_eq!(*r, expected);
        }
    }
}
