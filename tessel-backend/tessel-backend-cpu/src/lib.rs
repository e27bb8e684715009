//! CPU reference engine for Tessel: feed-contract checking and scripted logits.

mod device;
mod engine;

pub use device::{CpuDeviceBuffer, DeviceLedger};
pub use engine::{ReferenceEngine, ScriptStep, StepRecord};
