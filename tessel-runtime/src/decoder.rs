//! Greedy decoder: the generation loop that drives prefill and incremental
//! decode steps against an execution engine.
//!
//! ```text
//! Seeding ──► Stepping ──► Stepping ... ──► Stopped
//! ```
//!
//! Every step depends on the previous one's outputs (cache, last token,
//! sequence length), so steps run strictly one after another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use tessel_core::{
    ExecutionEngine, FinishReason, GenerationParams, ModelConfig, Result, SequenceTokenizer,
    Tensor, TesselError, TokenId, TokenSink,
};
use tessel_kvcache::KvCache;

use crate::sampling::GreedySampler;
use crate::step::{prompt_len, InferenceStep};

/// Caller-owned cancellation flag, checked before every step.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Token bookkeeping for one query.
#[derive(Debug, Clone)]
pub struct GenerationState {
    /// Prompt ids followed by every generated id.
    pub output_tokens: Vec<TokenId>,
    /// Tokens fed so far, i.e. the attention mask length of the latest step.
    pub seqlen: usize,
    pub last_token: Option<TokenId>,
    pub prompt_token_count: usize,
}

impl GenerationState {
    /// Seed from a `[1, N]` int64 prompt tensor.
    pub fn seed(prompt: &Tensor) -> Result<Self> {
        let n = prompt_len(prompt)?;
        let output_tokens = prompt
            .as_i64()?
            .iter()
            .map(|&id| {
                TokenId::try_from(id).map_err(|_| {
                    TesselError::InvalidArgument(format!("prompt token id {id} out of range"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            output_tokens,
            seqlen: n,
            last_token: None,
            prompt_token_count: n,
        })
    }

    pub fn push(&mut self, token: TokenId) {
        self.output_tokens.push(token);
        self.last_token = Some(token);
    }

    pub fn generated(&self) -> &[TokenId] {
        &self.output_tokens[self.prompt_token_count..]
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Prompt ids followed by the generated ids.
    pub tokens: Vec<TokenId>,
    /// Final cumulative decoded text of the generated suffix.
    pub text: String,
    pub finish_reason: FinishReason,
    /// Number of forward passes run.
    pub steps: usize,
    pub prompt_token_count: usize,
}

impl GenerationOutput {
    pub fn generated(&self) -> &[TokenId] {
        &self.tokens[self.prompt_token_count..]
    }
}

/// Ties together the execution engine, tokenizer and KV cache for greedy
/// generation. The decoder holds the engine exclusively, so one query runs
/// at a time.
pub struct GreedyDecoder<E: ExecutionEngine, T: SequenceTokenizer> {
    engine: E,
    tokenizer: T,
    config: ModelConfig,
    params: GenerationParams,
    sampler: GreedySampler,
    cancel: CancelFlag,
}

impl<E: ExecutionEngine, T: SequenceTokenizer> GreedyDecoder<E, T> {
    pub fn new(engine: E, tokenizer: T, config: ModelConfig) -> Self {
        Self {
            engine,
            tokenizer,
            config,
            params: GenerationParams::default(),
            sampler: GreedySampler,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Generate until a stop condition fires, streaming the cumulative
    /// decoded suffix to `sink` after each step.
    ///
    /// On error the query is abandoned; text already delivered to the sink
    /// is not retracted.
    pub fn generate<S>(&mut self, prompt: &str, sink: &mut S) -> Result<GenerationOutput>
    where
        S: TokenSink + ?Sized,
    {
        // Seeding
        let prompt_ids = self.tokenizer.encode(prompt)?;
        let mut state = GenerationState::seed(&prompt_ids)?;
        let mut cache = KvCache::new(&self.config)?;
        let mut step = InferenceStep::prefill(prompt_ids)?;
        let mut text = String::new();
        let mut steps = 0;

        info!(
            prompt_tokens = state.prompt_token_count,
            max_output_tokens = self.params.max_output_tokens,
            "start inferencing"
        );

        let finish_reason = if state.seqlen >= self.params.max_output_tokens {
            FinishReason::MaxTokens
        } else {
            // Stepping
            loop {
                if self.cancel.is_cancelled() {
                    break FinishReason::Cancelled;
                }

                state.seqlen = state.output_tokens.len();
                let mut outputs = step.run(&mut self.engine, &cache, state.seqlen)?;

                let logits = outputs
                    .logits()
                    .ok_or_else(|| TesselError::Engine("engine returned no logits".into()))?;
                let token = self.sampler.argmax(logits)?;
                state.push(token);

                text = self
                    .tokenizer
                    .decode(&state.output_tokens, state.prompt_token_count)?;
                sink.on_token(&text);

                cache.update(&mut outputs)?;
                cache.ensure_seq_len(state.seqlen)?;
                steps += 1;

                debug!(step = steps, token, seqlen = state.seqlen, "decode step");

                if let Some(reason) = self.config.is_stop_token(token) {
                    break reason;
                }
                if state.seqlen >= self.params.max_output_tokens {
                    break FinishReason::MaxTokens;
                }
                step = InferenceStep::decode(token, state.seqlen)?;
            }
        };

        // Stopped
        cache.release_all();
        info!(
            steps,
            generated = state.output_tokens.len() - state.prompt_token_count,
            reason = ?finish_reason,
            "inferencing completed"
        );

        Ok(GenerationOutput {
            tokens: state.output_tokens,
            text,
            finish_reason,
            steps,
            prompt_token_count: state.prompt_token_count,
        })
    }
}
