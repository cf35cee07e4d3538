//! Provider settings persisted on the client.
//!
//! The stored blob is a single JSON object under [`SETTINGS_KEY`]. Loading
//! always yields a complete [`Settings`]: stored string values override the
//! defaults key by key, anything missing or malformed falls back.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::provider::Provider;
use crate::store::KeyValueStore;

pub const SETTINGS_KEY: &str = "agentChatSettings";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub ollama_url: String,
    pub ollama_model: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub github_token: String,
    pub github_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "mythomax:latest".to_string(),
            openai_api_key: String::new(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            github_token: String::new(),
            github_model: "openai/gpt-4o-mini".to_string(),
        }
    }
}

impl Settings {
    /// Overlay a stored JSON blob onto the defaults.
    ///
    /// Only string values are taken from the blob; a blob that is not a JSON
    /// object is ignored entirely.
    pub fn merged(raw: Option<&str>) -> Self {
        let mut settings = Self::default();
        let Some(raw) = raw else {
            return settings;
        };

        let overrides = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                warn!(kind = json_kind(&other), "stored settings are not an object, using defaults");
                return settings;
            }
            Err(e) => {
                warn!(error = %e, "stored settings are malformed, using defaults");
                return settings;
            }
        };

        for field in SettingsField::all() {
            match overrides.get(field.key()) {
                Some(Value::String(value)) => field.set(&mut settings, value.clone()),
                Some(other) => {
                    debug!(key = field.key(), kind = json_kind(other), "ignoring non-string setting")
                }
                None => {}
            }
        }
        settings
    }

    /// Copy with every field trimmed.
    pub fn trimmed(&self) -> Self {
        let mut out = self.clone();
        for field in SettingsField::all() {
            let value = field.get(self).trim().to_string();
            field.set(&mut out, value);
        }
        out
    }

    /// Copy with blank credentials filled from the provider environment
    /// variables (`OPENAI_API_KEY`, `GITHUB_TOKEN`).
    pub fn with_env_credentials(&self) -> Self {
        let mut out = self.clone();
        for provider in Provider::all() {
            if let (Some(field), Some(value)) = (provider.credential_field(), provider.credential(self)) {
                field.set(&mut out, value);
            }
        }
        out
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsField {
    OllamaUrl,
    OllamaModel,
    OpenAIApiKey,
    OpenAIBaseUrl,
    OpenAIModel,
    GitHubToken,
    GitHubModel,
}

impl SettingsField {
    pub fn all() -> [SettingsField; 7] {
        [
            SettingsField::OllamaUrl,
            SettingsField::OllamaModel,
            SettingsField::OpenAIApiKey,
            SettingsField::OpenAIBaseUrl,
            SettingsField::OpenAIModel,
            SettingsField::GitHubToken,
            SettingsField::GitHubModel,
        ]
    }

    /// JSON key used in storage and on the wire.
    pub fn key(&self) -> &'static str {
        match self {
            SettingsField::OllamaUrl => "ollamaUrl",
            SettingsField::OllamaModel => "ollamaModel",
            SettingsField::OpenAIApiKey => "openaiApiKey",
            SettingsField::OpenAIBaseUrl => "openaiBaseUrl",
            SettingsField::OpenAIModel => "openaiModel",
            SettingsField::GitHubToken => "githubToken",
            SettingsField::GitHubModel => "githubModel",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SettingsField::OllamaUrl => "Ollama URL",
            SettingsField::OllamaModel => "Ollama model",
            SettingsField::OpenAIApiKey => "OpenAI API key",
            SettingsField::OpenAIBaseUrl => "OpenAI base URL",
            SettingsField::OpenAIModel => "OpenAI model",
            SettingsField::GitHubToken => "GitHub token",
            SettingsField::GitHubModel => "GitHub model",
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            SettingsField::OllamaUrl | SettingsField::OllamaModel => Provider::Ollama,
            SettingsField::OpenAIApiKey
            | SettingsField::OpenAIBaseUrl
            | SettingsField::OpenAIModel => Provider::OpenAI,
            SettingsField::GitHubToken | SettingsField::GitHubModel => Provider::GitHub,
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, SettingsField::OpenAIApiKey | SettingsField::GitHubToken)
    }

    /// Accepts the JSON key in any case, with or without `-`/`_` separators
    /// (`ollamaUrl`, `ollama-url`, `OLLAMA_URL`).
    pub fn from_key(key: &str) -> Option<Self> {
        let wanted: String = key
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        Self::all()
            .into_iter()
            .find(|field| field.key().to_lowercase() == wanted)
    }

    pub fn get<'a>(&self, settings: &'a Settings) -> &'a str {
        match self {
            SettingsField::OllamaUrl => &settings.ollama_url,
            SettingsField::OllamaModel => &settings.ollama_model,
            SettingsField::OpenAIApiKey => &settings.openai_api_key,
            SettingsField::OpenAIBaseUrl => &settings.openai_base_url,
            SettingsField::OpenAIModel => &settings.openai_model,
            SettingsField::GitHubToken => &settings.github_token,
            SettingsField::GitHubModel => &settings.github_model,
        }
    }

    pub fn set(&self, settings: &mut Settings, value: String) {
        let slot = match self {
            SettingsField::OllamaUrl => &mut settings.ollama_url,
            SettingsField::OllamaModel => &mut settings.ollama_model,
            SettingsField::OpenAIApiKey => &mut settings.openai_api_key,
            SettingsField::OpenAIBaseUrl => &mut settings.openai_base_url,
            SettingsField::OpenAIModel => &mut settings.openai_model,
            SettingsField::GitHubToken => &mut settings.github_token,
            SettingsField::GitHubModel => &mut settings.github_model,
        };
        *slot = value;
    }

    /// Value as it should be shown to the user; secrets keep only the last
    /// four characters.
    pub fn display_value(&self, settings: &Settings) -> String {
        let value = self.get(settings);
        if !self.is_secret() {
            return value.to_string();
        }
        mask_secret(value)
    }
}

pub fn mask_secret(value: &str) -> String {
    let char_count = value.chars().count();
    if char_count == 0 {
        String::new()
    } else if char_count <= 4 {
        "*".repeat(char_count)
    } else {
        let masked_len = char_count - 4;
        let last_four: String = value.chars().skip(masked_len).collect();
        format!("{}...{}", "*".repeat(masked_len.min(20)), last_four)
    }
}

/// Loads, saves and resets [`Settings`] through a [`KeyValueStore`].
pub struct SettingsStore<S> {
    store: S,
}

impl<S: KeyValueStore> SettingsStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Never fails: an unreadable or malformed blob yields defaults.
    pub fn load(&self) -> Settings {
        let raw = match self.store.get(SETTINGS_KEY) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "could not read stored settings, using defaults");
                None
            }
        };
        Settings::merged(raw.as_deref())
    }

    /// Trim every field and replace the stored blob with the result.
    pub fn save(&self, settings: &Settings) -> Result<Settings> {
        let trimmed = settings.trimmed();
        let json = serde_json::to_string_pretty(&trimmed)?;
        self.store.set(SETTINGS_KEY, &json)?;
        info!("settings saved");
        Ok(trimmed)
    }

    /// Remove the stored blob once `confirm` agrees. Returns whether anything
    /// was reset.
    pub fn reset(&self, confirm: impl FnOnce() -> bool) -> Result<bool> {
        if !confirm() {
            debug!("settings reset declined");
            return Ok(false);
        }
        self.store.remove(SETTINGS_KEY)?;
        info!("settings reset to defaults");
        Ok(true)
    }
}
