use crate::error::{Error, Result};
use crate::shapes::PointF32;
use std::fmt;
use std::str::FromStr;

pub const LANDMARK_COUNT: usize = 5;

/// Five landmarks in template order: left eye, right eye, nose tip, left
/// mouth corner, right mouth corner.
pub type Landmarks = [PointF32; LANDMARK_COUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Template {
    ArcfaceV1,
    ArcfaceV2,
    Ffhq,
}

// Reference spaces: 112x112 for the arcface layouts, 512x512 for ffhq.
const ARCFACE_V1: [[f32; 2]; LANDMARK_COUNT] = [
    [39.7300, 51.1380],
    [72.2700, 51.1380],
    [56.0000, 68.4930],
    [42.4630, 87.0100],
    [69.5370, 87.0100],
];

const ARCFACE_V2: [[f32; 2]; LANDMARK_COUNT] = [
    [38.2946, 51.6963],
    [73.5318, 51.5014],
    [56.0252, 71.7366],
    [41.5493, 92.3655],
    [70.7299, 92.2041],
];

const FFHQ: [[f32; 2]; LANDMARK_COUNT] = [
    [192.98138, 239.94708],
    [318.90277, 240.1936],
    [256.63416, 314.01935],
    [201.26117, 371.41043],
    [313.08905, 371.15118],
];

impl Template {
    pub const ALL: [Template; 3] = [Template::ArcfaceV1, Template::ArcfaceV2, Template::Ffhq];

    pub fn name(&self) -> &'static str {
        match self {
            Template::ArcfaceV1 => "arcface_v1",
            Template::ArcfaceV2 => "arcface_v2",
            Template::Ffhq => "ffhq",
        }
    }

    /// Side length of the square pixel space the raw points live in.
    pub fn reference_size(&self) -> u32 {
        match self {
            Template::ArcfaceV1 | Template::ArcfaceV2 => 112,
            Template::Ffhq => 512,
        }
    }

    pub fn points(&self) -> Landmarks {
        let raw = match self {
            Template::ArcfaceV1 => &ARCFACE_V1,
            Template::ArcfaceV2 => &ARCFACE_V2,
            Template::Ffhq => &FFHQ,
        };
        raw.map(PointF32::from)
    }

    /// Template points multiplied by `ratio`, normally
    /// `output_side / working_width`.
    pub fn scaled(&self, ratio: f32) -> Landmarks {
        self.points().map(|p| PointF32 {
            x: p.x * ratio,
            y: p.y * ratio,
        })
    }
}

impl FromStr for Template {
    type Err = Error;

    fn from_str(s: &str) -> Result<Template> {
        Template::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| Error::UnknownTemplate {
                name: s.to_string(),
                known: Template::ALL.map(|t| t.name()).join(", "),
            })
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve a template by name and scale it by the caller's size ratio.
pub fn lookup(name: &str, ratio: f32) -> Result<Landmarks> {
    Ok(name.parse::<Template>()?.scaled(ratio))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_names() {
        for t in Template::ALL {
            let points = lookup(t.name(), 1.).unwrap();
            assert_eq!(points, t.points());
        }
    }

    #[test]
    fn test_lookup_unknown_name() {
        let err = lookup("arcface_v3", 1.).unwrap_err();
        match err {
            Error::UnknownTemplate { name, known } => {
                assert_eq!(name, "arcface_v3");
                assert!(known.contains("ffhq"));
            }
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[test]
    fn test_scaled_keeps_precision() {
        let points = lookup("ffhq", 0.5).unwrap();
        assert_eq!(points[0], PointF32::new(192.98138 * 0.5, 239.94708 * 0.5));

        let points = lookup("arcface_v2", 2.).unwrap();
        assert!((points[2].x - 112.0504).abs() < 1e-4);
    }

    #[test]
    fn test_points_inside_reference_space() {
        for t in Template::ALL {
            let side = t.reference_size() as f32;
            for p in t.points() {
                assert!(p.x > 0. && p.x < side && p.y > 0. && p.y < side);
            }
        }
    }
}
