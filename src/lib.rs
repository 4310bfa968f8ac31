//! Face alignment and compositing.
//!
//! Detector outputs are decoded against anchor grids into boxes and five
//! point landmarks, landmarks are aligned onto a canonical template to cut a
//! square crop, and processed crops are feathered back into the source frame.

pub mod align;
pub mod cache;
pub mod composite;
pub mod detection;
pub mod engine;
pub mod error;
pub mod frame;
pub mod shapes;
pub mod template;
pub mod transform;

pub use align::{WarpSize, estimate_partial_affine, warp_face};
pub use composite::{MaskCache, MaskKey, Padding, create_static_mask, paste_back};
pub use detection::{
    AnchorCache, AnchorKey, Detection, apply_nms, decode_detections, distance_to_bbox,
    distance_to_keypoints, gen_anchors,
};
pub use engine::{EngineConfig, FaceEngine};
pub use error::{Error, Result};
pub use frame::{Channel, Frame, Mask};
pub use shapes::{Bbox, PointF32};
pub use template::{LANDMARK_COUNT, Landmarks, Template, lookup};
pub use transform::{AffineMatrix, Border, warp_affine, warp_mask};
