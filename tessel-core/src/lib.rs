//! Tessel core types, traits, and error definitions.

pub mod engine;
pub mod error;
pub mod names;
pub mod sink;
pub mod tensor;
pub mod tokenizer;
pub mod types;

pub use engine::{ExecutionEngine, Feed, StepOutputs};
pub use error::{Result, TesselError};
pub use names::{KvRole, TensorName};
pub use sink::TokenSink;
pub use tensor::{DeviceBuffer, Location, Tensor, TensorData};
pub use tokenizer::SequenceTokenizer;
pub use types::*;
