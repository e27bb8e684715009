//! Tessel runtime: feed assembly, greedy selection, and the decode loop.

pub mod decoder;
pub mod sampling;
pub mod sink;
pub mod step;

pub use decoder::{CancelFlag, GenerationOutput, GenerationState, GreedyDecoder};
pub use sampling::GreedySampler;
pub use sink::ChannelSink;
pub use step::InferenceStep;
