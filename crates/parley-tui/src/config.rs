use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use parley_core::{KeyValueStore, Provider};

pub const CONFIG_KEY: &str = "config";
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TURNS: u32 = 10;
pub const MAX_TURNS: u32 = 100;

/// Client preferences that are not provider settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub api: Option<String>,
    #[serde(default = "default_turns")]
    pub turns: u32,
}

fn default_turns() -> u32 {
    DEFAULT_TURNS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            backend_url: None,
            api: Some(Provider::Ollama.as_str().to_string()),
            turns: DEFAULT_TURNS,
        }
    }

    /// Falls back to defaults when nothing usable is stored.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let raw = match store.get(CONFIG_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Self::new(),
            Err(e) => {
                warn!(error = %e, "could not read client config");
                return Self::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "client config is malformed, using defaults");
                Self::new()
            }
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let config_content = serde_json::to_string_pretty(self)?;
        store.set(CONFIG_KEY, &config_content)?;
        Ok(())
    }

    pub fn provider(&self) -> Provider {
        self.api
            .as_deref()
            .and_then(Provider::from_str)
            .unwrap_or(Provider::Ollama)
    }

    pub fn clamped_turns(&self) -> u32 {
        self.turns.clamp(1, MAX_TURNS)
    }

    /// Command-line flag (or its env var) wins over the stored URL.
    pub fn resolve_backend_url(&self, flag: Option<&str>) -> String {
        flag.filter(|url| !url.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.backend_url.clone())
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
    }
}
