use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("unknown template {name:?} (expected one of: {known})")]
    UnknownTemplate { name: String, known: String },

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("singular affine matrix (determinant {det})")]
    SingularMatrix { det: f64 },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, Error>;
