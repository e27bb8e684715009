//! Past key/value cache for a single query.
//!
//! Each layer holds one key and one value tensor of shape
//! `[1, num_kv_heads, seq_len, head_dim]`. Slots start as zero-length host
//! placeholders and are replaced by the engine's `present` outputs after every
//! step. Tensors are never mutated in place: the cache takes ownership of the
//! new tensor and releases the one it supersedes.

use tracing::{debug, warn};

use tessel_core::{
    KvRole, Location, ModelConfig, Result, StepOutputs, Tensor, TensorName, TesselError,
};

/// Key and value tensors for one transformer layer.
struct LayerCache {
    key: Tensor,
    value: Tensor,
}

impl LayerCache {
    fn slot(&self, role: KvRole) -> &Tensor {
        match role {
            KvRole::Key => &self.key,
            KvRole::Value => &self.value,
        }
    }

    fn slot_mut(&mut self, role: KvRole) -> &mut Tensor {
        match role {
            KvRole::Key => &mut self.key,
            KvRole::Value => &mut self.value,
        }
    }
}

pub struct KvCache {
    layers: Vec<LayerCache>,
    num_kv_heads: usize,
    head_dim: usize,
}

impl KvCache {
    /// One empty key/value pair per layer, typed with `config.cache_dtype`.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let empty_shape = config.kv_shape(0);
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for _ in 0..config.num_hidden_layers {
            layers.push(LayerCache {
                key: Tensor::empty(config.cache_dtype, &empty_shape)?,
                value: Tensor::empty(config.cache_dtype, &empty_shape)?,
            });
        }
        Ok(Self {
            layers,
            num_kv_heads: config.num_key_value_heads,
            head_dim: config.head_dim(),
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn get(&self, layer: usize, role: KvRole) -> Result<&Tensor> {
        self.layers
            .get(layer)
            .map(|l| l.slot(role))
            .ok_or_else(|| self.layer_error(layer))
    }

    /// Current slots under their `past_key_values.{layer}.{role}` names.
    pub fn feed_entries(&self) -> Vec<(TensorName, &Tensor)> {
        let mut entries = Vec::with_capacity(self.layers.len() * 2);
        for (layer, cache) in self.layers.iter().enumerate() {
            for role in KvRole::ALL {
                entries.push((TensorName::Past { layer, role }, cache.slot(role)));
            }
        }
        entries
    }

    /// Move every `present.{layer}.{role}` output into its slot.
    ///
    /// The superseded tensor is released if it lives on the device; a failed
    /// release is logged and otherwise ignored. Outputs that are not present
    /// tensors stay in `outputs`. Returns the number of slots replaced.
    pub fn update(&mut self, outputs: &mut StepOutputs) -> Result<usize> {
        let present: Vec<(usize, KvRole)> = outputs
            .names()
            .filter_map(|name| match name {
                TensorName::Present { layer, role } => Some((layer, role)),
                _ => None,
            })
            .collect();

        // Validate everything up front so a bad output leaves the cache untouched.
        for &(layer, role) in &present {
            if layer >= self.layers.len() {
                return Err(self.layer_error(layer));
            }
            let name = TensorName::Present { layer, role };
            if let Some(tensor) = outputs.get(name) {
                self.check_kv_shape(tensor)?;
            }
        }

        let mut replaced = 0;
        for (layer, role) in present {
            let Some(tensor) = outputs.remove(TensorName::Present { layer, role }) else {
                continue;
            };
            let slot = self.layers[layer].slot_mut(role);
            let mut old = std::mem::replace(slot, tensor);
            if old.location() == Location::Device {
                if let Err(e) = old.release() {
                    warn!(layer, role = role.as_str(), error = %e, "failed to release superseded cache tensor");
                }
            }
            replaced += 1;
        }
        debug!(replaced, "kv cache updated");
        Ok(replaced)
    }

    /// Common sequence length of every slot.
    pub fn seq_len(&self) -> Result<usize> {
        let Some(first) = self.layers.first() else {
            return Ok(0);
        };
        let expected = first.key.seq_len()?;
        self.ensure_seq_len(expected)?;
        Ok(expected)
    }

    /// Check that every slot holds exactly `expected` tokens.
    pub fn ensure_seq_len(&self, expected: usize) -> Result<()> {
        for cache in &self.layers {
            for role in KvRole::ALL {
                let tensor = cache.slot(role);
                if tensor.seq_len()? != expected {
                    return Err(TesselError::ShapeMismatch {
                        expected: vec![1, self.num_kv_heads, expected, self.head_dim],
                        got: tensor.shape().to_vec(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Release every device-resident slot. Called when a query ends.
    pub fn release_all(&mut self) {
        for (layer, cache) in self.layers.iter_mut().enumerate() {
            for role in KvRole::ALL {
                if let Err(e) = cache.slot_mut(role).release() {
                    warn!(layer, role = role.as_str(), error = %e, "failed to release cache tensor");
                }
            }
        }
    }

    fn check_kv_shape(&self, tensor: &Tensor) -> Result<()> {
        let shape = tensor.shape();
        let ok = shape.len() == 4
            && shape[0] == 1
            && shape[1] == self.num_kv_heads
            && shape[3] == self.head_dim;
        if ok {
            Ok(())
        } else {
            let seq = shape.get(2).copied().unwrap_or(0);
            Err(TesselError::ShapeMismatch {
                expected: vec![1, self.num_kv_heads, seq, self.head_dim],
                got: shape.to_vec(),
            })
        }
    }

    fn layer_error(&self, layer: usize) -> TesselError {
        TesselError::InvalidArgument(format!(
            "layer {layer} exceeds num_layers {}",
            self.layers.len()
        ))
    }
}

impl Drop for KvCache {
    fn drop(&mut self) {
        self.release_all();
    }
}
