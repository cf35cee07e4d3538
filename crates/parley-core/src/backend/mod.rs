pub mod http;

pub use http::HttpBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::agents::AgentDescriptor;
use crate::provider::Provider;
use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend url: {0}")]
    Url(String),
    #[error("{0}")]
    Transport(String),
    #[error("{detail}")]
    Status { status: u16, detail: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub prompt: String,
    pub agent_name: String,
    pub api: Provider,
    pub settings: Settings,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatReply {
    pub response: String,
}

/// Body of `POST /test-connection`: only the fields of the provider under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestConnectionRequest {
    pub api: Provider,
    pub settings: BTreeMap<String, String>,
}

impl TestConnectionRequest {
    /// The provider's credential is resolved through
    /// [`Provider::credential`] so environment-only keys are sent too.
    pub fn for_provider(provider: Provider, settings: &Settings) -> Self {
        Self::for_provider_with(provider, settings, crate::provider::process_env)
    }

    /// Like [`for_provider`](Self::for_provider) with a custom environment lookup.
    pub fn for_provider_with(
        provider: Provider,
        settings: &Settings,
        env: impl Fn(&str) -> Option<String> + Copy,
    ) -> Self {
        let credential_field = provider.credential_field();
        let fields = provider
            .fields()
            .iter()
            .map(|field| {
                let value = if Some(*field) == credential_field {
                    provider.credential_with(settings, env).unwrap_or_default()
                } else {
                    field.get(settings).trim().to_string()
                };
                (field.key().to_string(), value)
            })
            .collect();
        Self {
            api: provider,
            settings: fields,
        }
    }
}

/// The agent backend's HTTP contract.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `GET /agents`
    async fn list_agents(&self) -> Result<Vec<AgentDescriptor>, BackendError>;

    /// `POST /chat`, returning the agent's reply text.
    async fn chat(&self, request: &ChatRequest) -> Result<String, BackendError>;

    /// `POST /clear-all-memory`
    async fn clear_all_memory(&self) -> Result<(), BackendError>;

    /// `POST /test-connection`, returning the backend's message.
    async fn test_connection(&self, request: &TestConnectionRequest) -> Result<String, BackendError>;
}

#[async_trait]
impl<B: ChatBackend + ?Sized> ChatBackend for std::sync::Arc<B> {
    async fn list_agents(&self) -> Result<Vec<AgentDescriptor>, BackendError> {
        (**self).list_agents().await
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, BackendError> {
        (**self).chat(request).await
    }

    async fn clear_all_memory(&self) -> Result<(), BackendError> {
        (**self).clear_all_memory().await
    }

    async fn test_connection(&self, request: &TestConnectionRequest) -> Result<String, BackendError> {
        (**self).test_connection(request).await
    }
}
