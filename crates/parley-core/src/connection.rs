use tracing::{info, warn};

use crate::backend::{ChatBackend, TestConnectionRequest};
use crate::provider::{process_env, Provider};
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// The backend reached the provider; carries its message.
    Connected(String),
    /// The backend or transport reported an error.
    Failed(String),
    /// A hosted provider has no key or token, so nothing was sent.
    MissingCredential(Provider),
}

impl ConnectionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ConnectionStatus::Connected(_))
    }

    /// One-line message for a banner.
    pub fn message(&self) -> String {
        match self {
            ConnectionStatus::Connected(message) => message.clone(),
            ConnectionStatus::Failed(reason) => format!("Connection failed: {}", reason),
            ConnectionStatus::MissingCredential(Provider::OpenAI) => {
                "Please enter your OpenAI API key first".to_string()
            }
            ConnectionStatus::MissingCredential(Provider::GitHub) => {
                "Please enter your GitHub token first".to_string()
            }
            ConnectionStatus::MissingCredential(provider) => {
                format!("Please configure {} first", provider.display_name())
            }
        }
    }
}

/// Fires one `/test-connection` request for a provider.
pub struct ConnectionTester<'a, B: ?Sized> {
    backend: &'a B,
    env: fn(&str) -> Option<String>,
}

impl<'a, B: ChatBackend + ?Sized> ConnectionTester<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            env: process_env,
        }
    }

    /// Replace the environment lookup used for credential fallback.
    pub fn with_env(mut self, env: fn(&str) -> Option<String>) -> Self {
        self.env = env;
        self
    }

    pub async fn test(&self, provider: Provider, settings: &Settings) -> ConnectionStatus {
        if provider.requires_credential() && provider.credential_with(settings, self.env).is_none() {
            warn!(%provider, "connection test skipped, no credential");
            return ConnectionStatus::MissingCredential(provider);
        }

        let request = TestConnectionRequest::for_provider_with(provider, settings, self.env);
        match self.backend.test_connection(&request).await {
            Ok(message) => {
                info!(%provider, "connection test passed");
                ConnectionStatus::Connected(message)
            }
            Err(e) => {
                warn!(%provider, error = %e, "connection test failed");
                ConnectionStatus::Failed(e.to_string())
            }
        }
    }
}
