use super::point::PointF32;

/// Corner-form box: `(x1, y1)` top left, `(x2, y2)` bottom right.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bbox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<[f32; 4]> for Bbox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Bbox {
        Bbox { x1, y1, x2, y2 }
    }
}

impl From<Bbox> for [f32; 4] {
    fn from(b: Bbox) -> [f32; 4] {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl Bbox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Bbox {
        Bbox { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.) * self.height().max(0.)
    }

    pub fn center(&self) -> PointF32 {
        PointF32 {
            x: (self.x1 + self.x2) * 0.5,
            y: (self.y1 + self.y2) * 0.5,
        }
    }

    pub fn iou(&self, other: &Bbox) -> f32 {
        let x_min = self.x1.max(other.x1);
        let x_max = self.x2.min(other.x2);
        let y_min = self.y1.max(other.y1);
        let y_max = self.y2.min(other.y2);

        let overlap_area = (x_max - x_min).max(0.) * (y_max - y_min).max(0.);
        let union_area = self.area() + other.area() - overlap_area;

        if union_area > 0. {
            overlap_area / union_area
        } else {
            0.
        }
    }
}
