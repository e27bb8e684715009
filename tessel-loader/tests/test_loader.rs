use std::io::Write;

use tessel_core::TesselError;
use tessel_loader::ConfigFile;

const PHI3_CONFIG: &str = r#"{
    "architectures": ["Phi3ForCausalLM"],
    "hidden_size": 3072,
    "intermediate_size": 8192,
    "num_hidden_layers": 32,
    "num_attention_heads": 32,
    "num_key_value_heads": 32,
    "vocab_size": 32064,
    "eos_token_id": 32000,
    "bos_token_id": 1
}"#;

#[test]
fn test_parse_phi3_config() {
    let config = ConfigFile::from_json(PHI3_CONFIG).unwrap();
    assert_eq!(config.hidden_size, 3072);
    assert_eq!(config.num_hidden_layers, 32);
    assert_eq!(config.vocab_size, Some(32064));

    let mc = config.to_model_config().unwrap();
    assert_eq!(mc.head_dim(), 96);
    assert_eq!(mc.eos_token_id, 32000);
    assert_eq!(mc.stop_token_ids, vec![32007]);
    assert_eq!(mc.kv_shape(0), vec![1, 32, 0, 96]);
}

#[test]
fn test_config_defaults() {
    let json = r#"{
        "hidden_size": 2048,
        "num_hidden_layers": 16,
        "num_attention_heads": 16,
        "eos_token_id": 2
    }"#;
    let mc = ConfigFile::from_json(json).unwrap().to_model_config().unwrap();
    assert_eq!(mc.num_key_value_heads, 16);
    assert_eq!(mc.stop_token_ids, vec![32007]);
}

#[test]
fn test_eos_list_and_explicit_stop_ids() {
    let json = r#"{
        "hidden_size": 4096,
        "num_hidden_layers": 32,
        "num_attention_heads": 32,
        "num_key_value_heads": 8,
        "eos_token_id": [128001, 128009],
        "stop_token_ids": [128009, 128008]
    }"#;
    let mc = ConfigFile::from_json(json).unwrap().to_model_config().unwrap();
    assert_eq!(mc.eos_token_id, 128001);
    assert_eq!(mc.stop_token_ids, vec![128009, 128008]);
    assert_eq!(mc.num_key_value_heads, 8);
}

#[test]
fn test_stop_ids_can_be_disabled() {
    let json = r#"{
        "hidden_size": 64,
        "num_hidden_layers": 2,
        "num_attention_heads": 4,
        "eos_token_id": 0,
        "stop_token_ids": []
    }"#;
    let mc = ConfigFile::from_json(json).unwrap().to_model_config().unwrap();
    assert!(mc.stop_token_ids.is_empty());
}

#[test]
fn test_invalid_head_split() {
    let json = r#"{
        "hidden_size": 100,
        "num_hidden_layers": 2,
        "num_attention_heads": 3,
        "eos_token_id": 0
    }"#;
    let err = ConfigFile::from_json(json).unwrap().to_model_config().unwrap_err();
    assert!(matches!(err, TesselError::Config(_)));
}

#[test]
fn test_missing_field_is_json_error() {
    let err = ConfigFile::from_json(r#"{"hidden_size": 8}"#).unwrap_err();
    assert!(matches!(err, TesselError::Json(_)));
}

#[test]
fn test_from_model_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut file = std::fs::File::create(dir.path().join("config.json")).unwrap();
    file.write_all(PHI3_CONFIG.as_bytes()).unwrap();

    let config = ConfigFile::from_model_dir(dir.path()).unwrap();
    assert_eq!(config.num_attention_heads, 32);
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigFile::from_model_dir(dir.path()).unwrap_err();
    assert!(matches!(err, TesselError::Io(_)));
}
