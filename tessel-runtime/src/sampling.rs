use tessel_core::{DType, Result, Tensor, TesselError, TokenId};

/// Deterministic greedy selection over the last position's logits.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedySampler;

impl GreedySampler {
    /// Pick the next token from `[1, positions, vocab]` logits.
    ///
    /// Only the final position is scanned. Any non-finite value in that row
    /// fails the step before a token is chosen.
    pub fn argmax(&self, logits: &Tensor) -> Result<TokenId> {
        if !matches!(logits.dtype(), DType::F32 | DType::F16) {
            return Err(TesselError::InvalidArgument(format!(
                "logits must be F32 or F16, got {:?}",
                logits.dtype()
            )));
        }
        let (positions, vocab) = match logits.shape() {
            [1, positions, vocab] if *positions > 0 && *vocab > 0 => (*positions, *vocab),
            shape => {
                return Err(TesselError::InvalidArgument(format!(
                    "logits must be [1, positions, vocab], got {shape:?}"
                )))
            }
        };
        let start = vocab * (positions - 1);
        let row = logits.f32_range(start, vocab)?;
        let idx = argmax_row(&row)?;
        TokenId::try_from(idx).map_err(|_| {
            TesselError::InvalidArgument(format!("vocab index {idx} does not fit a token id"))
        })
    }
}

/// Index of the first maximal value. Ties keep the lowest index.
pub fn argmax_row(row: &[f32]) -> Result<usize> {
    let first = *row
        .first()
        .ok_or_else(|| TesselError::InvalidArgument("empty logits".into()))?;
    let mut max = first;
    let mut max_idx = 0;
    for (i, &value) in row.iter().enumerate() {
        if !value.is_finite() {
            return Err(TesselError::NonFiniteLogit { index: i, value });
        }
        if value > max {
            max = value;
            max_idx = i;
        }
    }
    Ok(max_idx)
}
