use serde::{Deserialize, Serialize};

use crate::settings::{Settings, SettingsField};

/// Inference source the backend should route a turn to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    OpenAI,
    GitHub,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAI => "openai",
            Provider::GitHub => "github",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Some(Provider::Ollama),
            "openai" => Some(Provider::OpenAI),
            "github" => Some(Provider::GitHub),
            _ => None,
        }
    }

    pub fn all() -> Vec<Provider> {
        vec![Provider::Ollama, Provider::OpenAI, Provider::GitHub]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Ollama => "Ollama (Local)",
            Provider::OpenAI => "OpenAI API",
            Provider::GitHub => "GitHub Models",
        }
    }

    /// Next provider in `all()` order, wrapping around.
    pub fn next(&self) -> Provider {
        match self {
            Provider::Ollama => Provider::OpenAI,
            Provider::OpenAI => Provider::GitHub,
            Provider::GitHub => Provider::Ollama,
        }
    }

    /// Hosted providers refuse to run without a key or token.
    pub fn requires_credential(&self) -> bool {
        !matches!(self, Provider::Ollama)
    }

    /// Settings field holding this provider's credential, if it has one.
    pub fn credential_field(&self) -> Option<SettingsField> {
        match self {
            Provider::Ollama => None,
            Provider::OpenAI => Some(SettingsField::OpenAIApiKey),
            Provider::GitHub => Some(SettingsField::GitHubToken),
        }
    }

    /// Environment variable consulted when the stored credential is blank.
    pub fn credential_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::Ollama => None,
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::GitHub => Some("GITHUB_TOKEN"),
        }
    }

    /// Fields shown and tested together for this provider.
    pub fn fields(&self) -> &'static [SettingsField] {
        match self {
            Provider::Ollama => &[SettingsField::OllamaUrl, SettingsField::OllamaModel],
            Provider::OpenAI => &[
                SettingsField::OpenAIApiKey,
                SettingsField::OpenAIBaseUrl,
                SettingsField::OpenAIModel,
            ],
            Provider::GitHub => &[SettingsField::GitHubToken, SettingsField::GitHubModel],
        }
    }

    /// Resolve the credential for this provider: the stored value wins,
    /// otherwise the environment variable. Blank values count as missing.
    pub fn credential(&self, settings: &Settings) -> Option<String> {
        self.credential_with(settings, process_env)
    }

    /// [`credential`](Self::credential) with the environment lookup supplied
    /// by the caller.
    pub fn credential_with(
        &self,
        settings: &Settings,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        let field = self.credential_field()?;
        let stored = field.get(settings).trim();
        if !stored.is_empty() {
            return Some(stored.to_string());
        }
        self.credential_env_var()
            .and_then(env)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Returns where the credential comes from: "local", "settings", "env", or None
    pub fn credential_source(&self, settings: &Settings) -> Option<&'static str> {
        let Some(field) = self.credential_field() else {
            return Some("local");
        };
        if !field.get(settings).trim().is_empty() {
            Some("settings")
        } else if self.credential(settings).is_some() {
            Some("env")
        } else {
            None
        }
    }
}

/// Reads a variable from the process environment.
pub fn process_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
