use thiserror::Error;

#[derive(Error, Debug)]
pub enum TesselError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Non-finite logit {value} at vocab index {index}")]
    NonFiniteLogit { index: usize, value: f32 },

    #[error("Execution engine error: {0}")]
    Engine(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TesselError>;
