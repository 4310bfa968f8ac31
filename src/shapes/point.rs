#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointF32 {
    pub x: f32,
    pub y: f32,
}

impl PointF32 {
    pub fn new(x: f32, y: f32) -> PointF32 {
        PointF32 { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f32; 2]> for PointF32 {
    fn from([x, y]: [f32; 2]) -> PointF32 {
        PointF32 { x, y }
    }
}

impl From<PointF32> for robust::Coord<f64> {
    fn from(p: PointF32) -> robust::Coord<f64> {
        robust::Coord {
            x: p.x as f64,
            y: p.y as f64,
        }
    }
}
