use std::path::Path;

use tessel_core::{Result, SequenceTokenizer, Tensor, TesselError, TokenId};
use tokenizers::Tokenizer as Inner;

/// `tokenizer.json` backed tokenizer.
pub struct HfTokenizer {
    inner: Inner,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = Inner::from_file(path).map_err(|e| TesselError::Tokenizer(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn from_model_dir(dir: &Path) -> Result<Self> {
        Self::from_file(&dir.join("tokenizer.json"))
    }

    pub fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.inner.token_to_id(token)
    }

    /// Vocabulary size including added tokens.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl SequenceTokenizer for HfTokenizer {
    fn encode(&self, prompt: &str) -> Result<Tensor> {
        // The post-processor adds BOS and any other model-level special tokens.
        let encoding = self
            .inner
            .encode(prompt, true)
            .map_err(|e| TesselError::Tokenizer(e.to_string()))?;
        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| i64::from(id)).collect();
        let n = ids.len();
        Tensor::from_i64(ids, &[1, n])
    }

    fn decode(&self, ids: &[TokenId], skip_first: usize) -> Result<String> {
        let suffix = ids.get(skip_first..).ok_or_else(|| {
            TesselError::InvalidArgument(format!(
                "skip_first {skip_first} beyond {} tokens",
                ids.len()
            ))
        })?;
        // Special tokens are kept so end-of-turn markers stay visible.
        self.inner
            .decode(suffix, false)
            .map_err(|e| TesselError::Tokenizer(e.to_string()))
    }
}
