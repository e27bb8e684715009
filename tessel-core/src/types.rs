use serde::{Deserialize, Serialize};

/// Token id as produced by the tokenizer and selected by argmax.
pub type TokenId = u32;

/// Secondary end-of-turn id used by Phi-3 style vocabularies (`<|end|>`).
pub const DEFAULT_END_OF_TURN_TOKEN_ID: TokenId = 32007;

/// Default cap on the total sequence length (prompt + generated).
pub const DEFAULT_MAX_OUTPUT_TOKENS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    I64,
    F16,
    F32,
}

impl DType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::I64 => 8,
            DType::F32 => 4,
            DType::F16 => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub hidden_size: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    pub num_hidden_layers: usize,
    pub eos_token_id: TokenId,
    /// Additional ids that end generation with the same meaning as eos.
    pub stop_token_ids: Vec<TokenId>,
    /// Element type of the empty past key/value placeholders.
    pub cache_dtype: DType,
}

impl ModelConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Shape of one layer's key or value tensor holding `seq_len` tokens.
    pub fn kv_shape(&self, seq_len: usize) -> Vec<usize> {
        vec![1, self.num_key_value_heads, seq_len, self.head_dim()]
    }

    pub fn is_stop_token(&self, token_id: TokenId) -> Option<FinishReason> {
        if token_id == self.eos_token_id {
            Some(FinishReason::EosToken)
        } else if self.stop_token_ids.contains(&token_id) {
            Some(FinishReason::StopToken)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Generation stops once the sequence fed to a step reaches this length.
    pub max_output_tokens: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    EosToken,
    StopToken,
    MaxTokens,
    Cancelled,
}
