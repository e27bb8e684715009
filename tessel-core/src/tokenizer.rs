use crate::tensor::Tensor;
use crate::{Result, TokenId};

/// Text <-> token id boundary consumed by the decoder.
pub trait SequenceTokenizer {
    /// Encode a prompt into an int64 tensor of shape `[1, N]`.
    fn encode(&self, prompt: &str) -> Result<Tensor>;

    /// Decode `ids[skip_first..]`.
    ///
    /// Called with the whole running sequence every step so that multi-token
    /// subwords come out right; the result is the cumulative suffix text.
    fn decode(&self, ids: &[TokenId], skip_first: usize) -> Result<String>;
}

impl<T: SequenceTokenizer + ?Sized> SequenceTokenizer for &T {
    fn encode(&self, prompt: &str) -> Result<Tensor> {
        (**self).encode(prompt)
    }

    fn decode(&self, ids: &[TokenId], skip_first: usize) -> Result<String> {
        (**self).decode(ids, skip_first)
    }
}
