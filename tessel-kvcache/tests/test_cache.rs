use half::f16;

use tessel_backend_cpu::DeviceLedger;
use tessel_core::{
    DType, DeviceBuffer, KvRole, Location, ModelConfig, Result, StepOutputs, Tensor, TensorName,
    TesselError,
};
use tessel_kvcache::KvCache;

fn config() -> ModelConfig {
    ModelConfig {
        hidden_size: 16,
        num_attention_heads: 4,
        num_key_value_heads: 2,
        num_hidden_layers: 2,
        eos_token_id: 2,
        stop_token_ids: vec![],
        cache_dtype: DType::F16,
    }
}

fn device_tensor(ledger: &DeviceLedger, seq_len: usize) -> Tensor {
    let shape = config().kv_shape(seq_len);
    let numel = shape.iter().product();
    let buffer = ledger.allocate(numel).unwrap();
    Tensor::on_device(DType::F16, &shape, Box::new(buffer)).unwrap()
}

fn present_outputs(ledger: &DeviceLedger, seq_len: usize) -> StepOutputs {
    let mut outputs = StepOutputs::new();
    outputs.insert(
        TensorName::Logits,
        Tensor::from_f32(vec![0.0; 8], &[1, 1, 8]).unwrap(),
    );
    for layer in 0..2 {
        for role in KvRole::ALL {
            outputs.insert(
                TensorName::Present { layer, role },
                device_tensor(ledger, seq_len),
            );
        }
    }
    outputs
}

#[test]
fn test_new_cache_is_empty() {
    let cache = KvCache::new(&config()).unwrap();
    assert_eq!(cache.num_layers(), 2);
    assert_eq!(cache.seq_len().unwrap(), 0);

    let entries = cache.feed_entries();
    let names: Vec<String> = entries.iter().map(|(n, _)| n.to_string()).collect();
    assert_eq!(
        names,
        vec![
            "past_key_values.0.key",
            "past_key_values.0.value",
            "past_key_values.1.key",
            "past_key_values.1.value",
        ]
    );
    for (_, tensor) in entries {
        assert_eq!(tensor.shape(), &[1, 2, 0, 4]);
        assert_eq!(tensor.dtype(), DType::F16);
        assert_eq!(tensor.location(), Location::Host);
    }
}

#[test]
fn test_update_swaps_every_slot() {
    let ledger = DeviceLedger::new();
    let mut cache = KvCache::new(&config()).unwrap();
    let mut outputs = present_outputs(&ledger, 3);

    let replaced = cache.update(&mut outputs).unwrap();
    assert_eq!(replaced, 4);
    assert_eq!(cache.seq_len().unwrap(), 3);
    cache.ensure_seq_len(3).unwrap();

    // Logits are not a cache output and stay behind.
    assert_eq!(outputs.len(), 1);
    assert!(outputs.logits().is_some());
}

#[test]
fn test_update_releases_superseded_device_tensors() {
    let ledger = DeviceLedger::new();
    let mut cache = KvCache::new(&config()).unwrap();
    cache.update(&mut present_outputs(&ledger, 3)).unwrap();

    let before = cache.get(1, KvRole::Value).unwrap().device_id().unwrap();
    assert!(!ledger.is_released(before));

    cache.update(&mut present_outputs(&ledger, 4)).unwrap();
    let after = cache.get(1, KvRole::Value).unwrap().device_id().unwrap();

    assert_ne!(before, after);
    assert!(ledger.is_released(before));
    assert!(!ledger.is_released(after));
    assert_eq!(ledger.live(), 4);
    assert_eq!(cache.seq_len().unwrap(), 4);
}

#[test]
fn test_drop_releases_remaining_slots() {
    let ledger = DeviceLedger::new();
    {
        let mut cache = KvCache::new(&config()).unwrap();
        cache.update(&mut present_outputs(&ledger, 3)).unwrap();
        assert_eq!(ledger.live(), 4);
    }
    assert_eq!(ledger.live(), 0);
}

#[test]
fn test_release_all_then_drop_releases_once() {
    let ledger = DeviceLedger::new();
    let mut cache = KvCache::new(&config()).unwrap();
    cache.update(&mut present_outputs(&ledger, 2)).unwrap();
    cache.release_all();
    assert_eq!(ledger.live(), 0);
    drop(cache);
    assert_eq!(ledger.released_ids().len(), 4);
}

#[test]
fn test_unrecognized_outputs_ignored() {
    let mut cache = KvCache::new(&config()).unwrap();
    let shape = config().kv_shape(5);
    let numel: usize = shape.iter().product();
    let mut outputs = StepOutputs::from_named(vec![
        (
            "present.0.key".to_string(),
            Tensor::from_f16(vec![f16::ZERO; numel], &shape).unwrap(),
        ),
        (
            "hidden_states".to_string(),
            Tensor::from_f32(vec![1.0], &[1]).unwrap(),
        ),
    ]);
    assert_eq!(outputs.len(), 1);

    let replaced = cache.update(&mut outputs).unwrap();
    assert_eq!(replaced, 1);
    assert_eq!(cache.get(0, KvRole::Key).unwrap().seq_len().unwrap(), 5);
    // The other slots were not touched, so the cache no longer agrees.
    assert!(cache.seq_len().is_err());
}

#[test]
fn test_layer_out_of_range_leaves_cache_untouched() {
    let ledger = DeviceLedger::new();
    let mut cache = KvCache::new(&config()).unwrap();
    let mut outputs = present_outputs(&ledger, 3);
    outputs.insert(
        TensorName::Present {
            layer: 9,
            role: KvRole::Key,
        },
        device_tensor(&ledger, 3),
    );

    let err = cache.update(&mut outputs).unwrap_err();
    assert!(matches!(err, TesselError::InvalidArgument(_)));
    assert_eq!(cache.seq_len().unwrap(), 0);
}

#[test]
fn test_wrong_head_layout_rejected() {
    let mut cache = KvCache::new(&config()).unwrap();
    let mut outputs = StepOutputs::new();
    outputs.insert(
        TensorName::Present {
            layer: 0,
            role: KvRole::Key,
        },
        Tensor::empty(DType::F16, &[1, 3, 0, 4]).unwrap(),
    );
    assert!(matches!(
        cache.update(&mut outputs),
        Err(TesselError::ShapeMismatch { .. })
    ));
}

#[derive(Debug)]
struct FailingBuffer(usize);

impl DeviceBuffer for FailingBuffer {
    fn id(&self) -> u64 {
        99
    }
    fn len(&self) -> usize {
        self.0
    }
    fn release(&self) -> Result<()> {
        Err(TesselError::Engine("device lost".into()))
    }
}

#[test]
fn test_release_failure_is_not_fatal() {
    let ledger = DeviceLedger::new();
    let mut cache = KvCache::new(&config()).unwrap();
    let shape = config().kv_shape(1);
    let numel: usize = shape.iter().product();
    let mut first = StepOutputs::new();
    first.insert(
        TensorName::Present {
            layer: 0,
            role: KvRole::Key,
        },
        Tensor::on_device(DType::F16, &shape, Box::new(FailingBuffer(numel))).unwrap(),
    );
    cache.update(&mut first).unwrap();

    let mut second = present_outputs(&ledger, 2);
    assert_eq!(cache.update(&mut second).unwrap(), 4);
    cache.ensure_seq_len(2).unwrap();
}
