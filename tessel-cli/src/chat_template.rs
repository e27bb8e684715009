use std::path::Path;

use minijinja::Environment;
use tracing::info;

use tessel_core::{Result, TesselError};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly assistant.";

pub struct ChatTemplate {
    env: Environment<'static>,
}

impl ChatTemplate {
    pub fn new(template_str: &str) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template_owned("chat", template_str.to_string())
            .map_err(|e| TesselError::Config(format!("Template parse error: {e}")))?;
        Ok(Self { env })
    }

    pub fn phi3_default() -> Result<Self> {
        Self::new(PHI3_TEMPLATE)
    }

    /// Use `chat_template` from `tokenizer_config.json` when present,
    /// otherwise the Phi-3 layout.
    pub fn from_model_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join("tokenizer_config.json");
        if config_path.exists() {
            let text = std::fs::read_to_string(&config_path)?;
            let value: serde_json::Value = serde_json::from_str(&text)?;
            if let Some(tmpl) = value.get("chat_template").and_then(|v| v.as_str()) {
                return Self::new(tmpl);
            }
        }
        info!("No chat_template in tokenizer_config.json, using Phi-3 default");
        Self::phi3_default()
    }

    /// Renders `(role, content)` turns.
    pub fn apply(&self, messages: &[(&str, &str)], add_generation_prompt: bool) -> Result<String> {
        let tmpl = self
            .env
            .get_template("chat")
            .map_err(|e| TesselError::Internal(e.to_string()))?;

        let msgs: Vec<minijinja::Value> = messages
            .iter()
            .map(|(role, content)| minijinja::context! { role => *role, content => *content })
            .collect();

        tmpl.render(minijinja::context! {
            messages => msgs,
            add_generation_prompt => add_generation_prompt,
        })
        .map_err(|e| TesselError::Internal(e.to_string()))
    }

    /// A single user turn under `system`, ready for the assistant's reply.
    pub fn prompt(&self, system: &str, user: &str) -> Result<String> {
        self.apply(&[("system", system), ("user", user)], true)
    }
}

const PHI3_TEMPLATE: &str = r#"{% for message in messages %}<|{{ message.role }}|>
{{ message.content }}<|end|>
{% endfor %}{% if add_generation_prompt %}<|assistant|>
{% endif %}"#;
