pub mod bbox;
pub mod point;

pub use bbox::Bbox;
pub use point::PointF32;
