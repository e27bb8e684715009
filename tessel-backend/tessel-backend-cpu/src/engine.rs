//! Reference execution engine.
//!
//! Checks every feed against the incremental-decode contract (token and
//! position layout, mask length, past key/value shapes) and answers with
//! scripted logits plus correctly shaped `present` tensors. It does not run a
//! transformer; it stands in for one in tests and dry runs.

use std::collections::VecDeque;

use half::f16;
use tracing::debug;

use tessel_core::{
    DType, ExecutionEngine, Feed, KvRole, Location, ModelConfig, Result, StepOutputs, Tensor,
    TensorData, TensorName, TesselError, TokenId,
};

use crate::device::DeviceLedger;

/// What the engine answers on one step.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// One-hot logits selecting this token at the last position.
    Select(TokenId),
    /// Raw last-position logits (length must equal the vocab size).
    Row(Vec<f32>),
    /// Fail the forward pass with this message.
    Fail(String),
}

/// What the engine observed on one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub input_ids: Vec<i64>,
    pub position_ids: Vec<i64>,
    pub attention_mask_len: usize,
    pub past_len: usize,
}

pub struct ReferenceEngine {
    config: ModelConfig,
    vocab_size: usize,
    script: VecDeque<ScriptStep>,
    present_location: Location,
    ledger: DeviceLedger,
    history: Vec<StepRecord>,
}

impl ReferenceEngine {
    pub fn new(config: ModelConfig, vocab_size: usize) -> Self {
        Self {
            config,
            vocab_size,
            script: VecDeque::new(),
            present_location: Location::Host,
            ledger: DeviceLedger::new(),
            history: Vec::new(),
        }
    }

    /// Tokens to select on successive steps. Once the script runs out the
    /// engine selects the eos token.
    pub fn with_tokens(mut self, tokens: impl IntoIterator<Item = TokenId>) -> Self {
        self.script.extend(tokens.into_iter().map(ScriptStep::Select));
        self
    }

    pub fn with_steps(mut self, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        self.script.extend(steps);
        self
    }

    /// Emit `present` tensors as device allocations tracked by `ledger`.
    pub fn on_device(mut self, ledger: DeviceLedger) -> Self {
        self.present_location = Location::Device;
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> &DeviceLedger {
        &self.ledger
    }

    pub fn history(&self) -> &[StepRecord] {
        &self.history
    }

    fn check_feed(&self, feed: &Feed<'_>) -> Result<StepRecord> {
        let input_ids = feed.input_ids.as_i64()?;
        let n = input_ids.len();
        if n == 0 || feed.input_ids.shape() != [1, n] {
            return Err(TesselError::Engine(format!(
                "input_ids must be [1, n>0], got {:?}",
                feed.input_ids.shape()
            )));
        }

        let key0 = feed
            .get(TensorName::Past {
                layer: 0,
                role: KvRole::Key,
            })
            .ok_or_else(|| TesselError::Engine("missing past_key_values.0.key".into()))?;
        let past_len = key0.seq_len()?;

        for layer in 0..self.config.num_hidden_layers {
            for role in KvRole::ALL {
                let name = TensorName::Past { layer, role };
                let past = feed
                    .get(name)
                    .ok_or_else(|| TesselError::Engine(format!("missing input {name}")))?;
                if past.is_released() {
                    return Err(TesselError::Engine(format!("{name} was already released")));
                }
                let expected = self.config.kv_shape(past_len);
                if past.shape() != expected.as_slice() {
                    return Err(TesselError::Engine(format!(
                        "{name} has shape {:?}, expected {expected:?}",
                        past.shape()
                    )));
                }
            }
        }

        let position_ids = feed.position_ids.as_i64()?;
        let expected_positions: Vec<i64> = (past_len..past_len + n).map(|p| p as i64).collect();
        if feed.position_ids.shape() != [1, n] || position_ids != expected_positions.as_slice() {
            return Err(TesselError::Engine(format!(
                "position_ids {position_ids:?} do not continue past length {past_len}"
            )));
        }

        let mask = feed.attention_mask.as_i64()?;
        let total = past_len + n;
        if feed.attention_mask.shape() != [1, total] || mask.iter().any(|&m| m != 1) {
            return Err(TesselError::Engine(format!(
                "attention_mask must be [1, {total}] of ones, got {:?}",
                feed.attention_mask.shape()
            )));
        }

        Ok(StepRecord {
            input_ids: input_ids.to_vec(),
            position_ids: position_ids.to_vec(),
            attention_mask_len: total,
            past_len,
        })
    }

    fn logits(&self, positions: usize, step: ScriptStep) -> Result<Tensor> {
        let mut data = vec![0.0f32; positions * self.vocab_size];
        let last = (positions - 1) * self.vocab_size;
        match step {
            ScriptStep::Select(token) => {
                let idx = token as usize;
                if idx >= self.vocab_size {
                    return Err(TesselError::Engine(format!(
                        "scripted token {token} outside vocab of {}",
                        self.vocab_size
                    )));
                }
                data[last + idx] = 1.0;
            }
            ScriptStep::Row(row) => {
                if row.len() != self.vocab_size {
                    return Err(TesselError::Engine(format!(
                        "scripted logits row has {} entries, vocab is {}",
                        row.len(),
                        self.vocab_size
                    )));
                }
                data[last..].copy_from_slice(&row);
            }
            ScriptStep::Fail(msg) => return Err(TesselError::Engine(msg)),
        }
        Tensor::from_f32(data, &[1, positions, self.vocab_size])
    }

    fn present(&self, seq_len: usize) -> Result<Tensor> {
        let shape = self.config.kv_shape(seq_len);
        let numel: usize = shape.iter().product();
        match self.present_location {
            Location::Host => {
                let data = match self.config.cache_dtype {
                    DType::F16 => TensorData::F16(vec![f16::ZERO; numel]),
                    DType::F32 => TensorData::F32(vec![0.0; numel]),
                    DType::I64 => TensorData::I64(vec![0; numel]),
                };
                Tensor::new(data, &shape)
            }
            Location::Device => {
                let buffer = self.ledger.allocate(numel)?;
                Tensor::on_device(self.config.cache_dtype, &shape, Box::new(buffer))
            }
        }
    }
}

impl ExecutionEngine for ReferenceEngine {
    fn run(&mut self, feed: &Feed<'_>) -> Result<StepOutputs> {
        let record = self.check_feed(feed)?;
        let positions = record.input_ids.len();
        let total = record.attention_mask_len;

        let step = self
            .script
            .pop_front()
            .unwrap_or(ScriptStep::Select(self.config.eos_token_id));
        let logits = self.logits(positions, step)?;

        let mut outputs = StepOutputs::new();
        outputs.insert(TensorName::Logits, logits);
        for layer in 0..self.config.num_hidden_layers {
            for role in KvRole::ALL {
                outputs.insert(TensorName::Present { layer, role }, self.present(total)?);
            }
        }

        debug!(
            step = self.history.len(),
            positions, total, "reference engine forward pass"
        );
        self.history.push(record);
        Ok(outputs)
    }
}
