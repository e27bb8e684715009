use std::path::Path;

use serde::Deserialize;
use tracing::info;

use tessel_core::{
    DType, ModelConfig, Result, TesselError, TokenId, DEFAULT_END_OF_TURN_TOKEN_ID,
};

/// `eos_token_id` appears either as a single id or a list of ids.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EosTokenId {
    Single(TokenId),
    Multiple(Vec<TokenId>),
}

#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub hidden_size: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: Option<usize>,
    pub num_hidden_layers: usize,
    pub eos_token_id: EosTokenId,
    #[serde(default = "default_stop_token_ids")]
    pub stop_token_ids: Vec<TokenId>,
    #[serde(default)]
    pub vocab_size: Option<usize>,
}

fn default_stop_token_ids() -> Vec<TokenId> {
    vec![DEFAULT_END_OF_TURN_TOKEN_ID]
}

impl ConfigFile {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Read `config.json` from a model directory.
    pub fn from_model_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join("config.json");
        let config = Self::from_file(&config_path)?;
        info!(
            path = %config_path.display(),
            layers = config.num_hidden_layers,
            heads = config.num_attention_heads,
            "model config loaded"
        );
        Ok(config)
    }

    pub fn to_model_config(&self) -> Result<ModelConfig> {
        if self.num_attention_heads == 0 || self.num_hidden_layers == 0 {
            return Err(TesselError::Config(
                "num_attention_heads and num_hidden_layers must be non-zero".into(),
            ));
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(TesselError::Config(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            )));
        }
        let num_key_value_heads = self.num_key_value_heads.unwrap_or(self.num_attention_heads);
        if num_key_value_heads == 0 {
            return Err(TesselError::Config("num_key_value_heads must be non-zero".into()));
        }

        let (eos_token_id, mut stop_token_ids) = match &self.eos_token_id {
            EosTokenId::Single(id) => (*id, Vec::new()),
            EosTokenId::Multiple(ids) => {
                let (first, rest) = ids
                    .split_first()
                    .ok_or_else(|| TesselError::Config("eos_token_id list is empty".into()))?;
                (*first, rest.to_vec())
            }
        };
        for &id in &self.stop_token_ids {
            if id != eos_token_id && !stop_token_ids.contains(&id) {
                stop_token_ids.push(id);
            }
        }

        Ok(ModelConfig {
            hidden_size: self.hidden_size,
            num_attention_heads: self.num_attention_heads,
            num_key_value_heads,
            num_hidden_layers: self.num_hidden_layers,
            eos_token_id,
            stop_token_ids,
            cache_dtype: DType::F16,
        })
    }
}
