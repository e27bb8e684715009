//! One forward pass: feed assembly and the engine call.

use tessel_core::{ExecutionEngine, Feed, Result, StepOutputs, Tensor, TesselError, TokenId};
use tessel_kvcache::KvCache;

/// Token and position inputs for a single step.
///
/// The attention mask and past key/value entries are attached when the feed
/// is built, since they depend on the cache state at that moment.
#[derive(Debug)]
pub struct InferenceStep {
    input_ids: Tensor,
    position_ids: Tensor,
}

impl InferenceStep {
    /// First step: the whole `[1, N]` prompt at positions `0..N`.
    pub fn prefill(prompt: Tensor) -> Result<Self> {
        let n = prompt_len(&prompt)?;
        let positions: Vec<i64> = (0..n as i64).collect();
        Ok(Self {
            input_ids: prompt,
            position_ids: Tensor::from_i64(positions, &[1, n])?,
        })
    }

    /// Later steps: the newest token at `position`, the sequence length
    /// before it was appended.
    pub fn decode(token: TokenId, position: usize) -> Result<Self> {
        Ok(Self {
            input_ids: Tensor::from_i64(vec![i64::from(token)], &[1, 1])?,
            position_ids: Tensor::from_i64(vec![position as i64], &[1, 1])?,
        })
    }

    pub fn input_ids(&self) -> &Tensor {
        &self.input_ids
    }

    pub fn position_ids(&self) -> &Tensor {
        &self.position_ids
    }

    /// Assemble the named inputs, borrowing the cache's past tensors.
    pub fn feed(self, cache: &KvCache, seqlen: usize) -> Result<Feed<'_>> {
        Ok(Feed {
            input_ids: self.input_ids,
            position_ids: self.position_ids,
            attention_mask: attention_mask(seqlen)?,
            past: cache.feed_entries(),
        })
    }

    /// Run the forward pass. Engine errors are returned untouched.
    pub fn run<E>(self, engine: &mut E, cache: &KvCache, seqlen: usize) -> Result<StepOutputs>
    where
        E: ExecutionEngine + ?Sized,
    {
        let feed = self.feed(cache, seqlen)?;
        engine.run(&feed)
    }
}

/// All-ones int64 mask of shape `[1, seqlen]`.
pub fn attention_mask(seqlen: usize) -> Result<Tensor> {
    Tensor::from_i64(vec![1; seqlen], &[1, seqlen])
}

/// Length `N` of a `[1, N]` int64 prompt tensor.
pub fn prompt_len(prompt: &Tensor) -> Result<usize> {
    prompt.as_i64()?;
    match prompt.shape() {
        [1, n] if *n > 0 => Ok(*n),
        shape => Err(TesselError::InvalidArgument(format!(
            "prompt must be a non-empty [1, N] tensor, got {shape:?}"
        ))),
    }
}
