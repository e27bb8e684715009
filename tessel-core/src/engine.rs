use std::collections::BTreeMap;

use tracing::debug;

use crate::names::TensorName;
use crate::tensor::Tensor;
use crate::Result;

/// Named inputs for one forward pass.
///
/// Token, position and mask tensors are owned by the feed and rebuilt every
/// step. Past key/value tensors are borrowed from the cache that owns them.
pub struct Feed<'a> {
    pub input_ids: Tensor,
    pub position_ids: Tensor,
    pub attention_mask: Tensor,
    pub past: Vec<(TensorName, &'a Tensor)>,
}

impl<'a> Feed<'a> {
    pub fn get(&self, name: TensorName) -> Option<&Tensor> {
        match name {
            TensorName::InputIds => Some(&self.input_ids),
            TensorName::PositionIds => Some(&self.position_ids),
            TensorName::AttentionMask => Some(&self.attention_mask),
            TensorName::Past { .. } => self
                .past
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, t)| *t),
            TensorName::Logits | TensorName::Present { .. } => None,
        }
    }

    /// All inputs under their engine-facing names.
    pub fn iter(&self) -> impl Iterator<Item = (TensorName, &Tensor)> + '_ {
        [
            (TensorName::InputIds, &self.input_ids),
            (TensorName::PositionIds, &self.position_ids),
            (TensorName::AttentionMask, &self.attention_mask),
        ]
        .into_iter()
        .chain(self.past.iter().map(|(n, t)| (*n, *t)))
    }
}

/// Named outputs of one forward pass.
#[derive(Debug, Default)]
pub struct StepOutputs {
    tensors: BTreeMap<TensorName, Tensor>,
}

impl StepOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw engine names. Names outside the known set are dropped.
    pub fn from_named<I>(outputs: I) -> Self
    where
        I: IntoIterator<Item = (String, Tensor)>,
    {
        let mut tensors = BTreeMap::new();
        for (raw, tensor) in outputs {
            match raw.parse::<TensorName>() {
                Ok(name) => {
                    tensors.insert(name, tensor);
                }
                Err(_) => debug!(name = %raw, "ignoring unrecognized engine output"),
            }
        }
        Self { tensors }
    }

    pub fn insert(&mut self, name: TensorName, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name, tensor)
    }

    pub fn get(&self, name: TensorName) -> Option<&Tensor> {
        self.tensors.get(&name)
    }

    pub fn remove(&mut self, name: TensorName) -> Option<Tensor> {
        self.tensors.remove(&name)
    }

    pub fn logits(&self) -> Option<&Tensor> {
        self.get(TensorName::Logits)
    }

    pub fn names(&self) -> impl Iterator<Item = TensorName> + '_ {
        self.tensors.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// The forward-pass executor. Implementations own the model graph and
/// whatever device state it needs; each call is awaited as one unit.
pub trait ExecutionEngine {
    fn run(&mut self, feed: &Feed<'_>) -> Result<StepOutputs>;
}

impl<E: ExecutionEngine + ?Sized> ExecutionEngine for &mut E {
    fn run(&mut self, feed: &Feed<'_>) -> Result<StepOutputs> {
        (**self).run(feed)
    }
}
