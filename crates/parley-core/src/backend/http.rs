use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{BackendError, ChatBackend, ChatReply, ChatRequest, TestConnectionRequest};
use crate::agents::AgentDescriptor;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TestConnectionReply {
    #[serde(default)]
    message: Option<String>,
}

/// reqwest client for the agent backend.
#[derive(Clone)]
pub struct HttpBackend {
    base: Url,
    http: Client,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        // A trailing slash keeps any path prefix when joining endpoints.
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base = Url::parse(&normalized).map_err(|e| BackendError::Url(e.to_string()))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base
            .join(path)
            .map_err(|e| BackendError::Url(e.to_string()))
    }

    /// Turn a non-success response into [`BackendError::Status`], reading
    /// `detail` from the body when there is one.
    async fn ensure_success(response: Response, fallback: &str) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = error_detail(&body).unwrap_or_else(|| fallback.to_string());
        warn!(status = status.as_u16(), %detail, "backend request failed");
        Err(BackendError::Status {
            status: status.as_u16(),
            detail,
        })
    }
}

/// Extract `detail` from a `{detail: ...}` error body. Non-string details
/// (validation error lists) are rendered as compact JSON.
pub fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

fn decode(e: reqwest::Error) -> BackendError {
    BackendError::Decode(e.to_string())
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn list_agents(&self) -> Result<Vec<AgentDescriptor>, BackendError> {
        let url = self.endpoint("agents")?;
        let response = self.http.get(url).send().await.map_err(transport)?;
        let response = Self::ensure_success(response, "Failed to load agents").await?;
        let agents = response
            .json::<Vec<AgentDescriptor>>()
            .await
            .map_err(decode)?;
        debug!(count = agents.len(), "agents loaded");
        Ok(agents)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, BackendError> {
        let url = self.endpoint("chat")?;
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        let response = Self::ensure_success(response, "Chat failed").await?;
        let reply = response.json::<ChatReply>().await.map_err(decode)?;
        Ok(reply.response)
    }

    async fn clear_all_memory(&self) -> Result<(), BackendError> {
        let url = self.endpoint("clear-all-memory")?;
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(transport)?;
        let response = Self::ensure_success(response, "Failed to clear memory").await?;
        // Body is only checked for being JSON; its message is not used.
        response.json::<Value>().await.map_err(decode)?;
        Ok(())
    }

    async fn test_connection(&self, request: &TestConnectionRequest) -> Result<String, BackendError> {
        let url = self.endpoint("test-connection")?;
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        let response = Self::ensure_success(response, "Connection test failed").await?;
        let reply = response
            .json::<TestConnectionReply>()
            .await
            .map_err(decode)?;
        Ok(reply
            .message
            .unwrap_or_else(|| "Connection successful".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use crate::settings::Settings;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_request(agent: &str, api: Provider) -> ChatRequest {
        ChatRequest {
            prompt: "A stranger arrives.".to_string(),
            agent_name: agent.to_string(),
            api,
            settings: Settings::default(),
        }
    }

    #[test]
    fn error_detail_variants() {
        assert_eq!(error_detail(r#"{"detail": "boom"}"#).as_deref(), Some("boom"));
        assert_eq!(
            error_detail(r#"{"detail": [{"msg": "field required"}]}"#).as_deref(),
            Some(r#"[{"msg":"field required"}]"#)
        );
        assert_eq!(error_detail(r#"{"detail": null}"#), None);
        assert_eq!(error_detail(r#"{"error": "x"}"#), None);
        assert_eq!(error_detail("Internal Server Error"), None);
    }

    #[test]
    fn base_url_keeps_path_prefix() {
        let backend = HttpBackend::new("http://localhost:8000/api").unwrap();
        assert_eq!(
            backend.endpoint("chat").unwrap().as_str(),
            "http://localhost:8000/api/chat"
        );
        assert!(matches!(HttpBackend::new("not a url"), Err(BackendError::Url(_))));
    }

    #[tokio::test]
    async fn chat_posts_contract_body_and_reads_response() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_partial_json(json!({
                "prompt": "A stranger arrives.",
                "agent_name": "Bob",
                "api": "github",
                "settings": { "githubModel": "openai/gpt-4o-mini" }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "response": "Well met, traveler." })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let backend = HttpBackend::new(&mock_server.uri()).unwrap();
        let reply = backend.chat(&chat_request("Bob", Provider::GitHub)).await.unwrap();
        assert_eq!(reply, "Well met, traveler.");
    }

    #[tokio::test]
    async fn chat_error_uses_detail() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "detail": "model offline" })))
            .mount(&mock_server)
            .await;

        let backend = HttpBackend::new(&mock_server.uri()).unwrap();
        let err = backend.chat(&chat_request("Alice", Provider::Ollama)).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 500, .. }));
        assert_eq!(err.to_string(), "model offline");
    }

    #[tokio::test]
    async fn chat_error_without_detail_uses_fallback() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(502).set_body_json(json!({})))
            .mount(&mock_server)
            .await;

        let backend = HttpBackend::new(&mock_server.uri()).unwrap();
        let err = backend.chat(&chat_request("Alice", Provider::Ollama)).await.unwrap_err();
        assert_eq!(err.to_string(), "Chat failed");
    }

    #[tokio::test]
    async fn chat_without_response_field_is_malformed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "reply": "hi" })))
            .mount(&mock_server)
            .await;

        let backend = HttpBackend::new(&mock_server.uri()).unwrap();
        let err = backend.chat(&chat_request("Alice", Provider::Ollama)).await.unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }

    #[tokio::test]
    async fn list_agents_ignores_extra_fields() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 1, "name": "Alice", "persona": "merchant" },
                { "name": "Bob" }
            ])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let backend = HttpBackend::new(&mock_server.uri()).unwrap();
        let agents = backend.list_agents().await.unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].name, "Alice");
        assert_eq!(agents[0].persona.as_deref(), Some("merchant"));
        assert_eq!(agents[1].persona, None);
    }

    #[tokio::test]
    async fn list_agents_failure_falls_back_to_endpoint_message() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agents"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let backend = HttpBackend::new(&mock_server.uri()).unwrap();
        let err = backend.list_agents().await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to load agents");
    }

    #[tokio::test]
    async fn clear_all_memory_posts_once() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/clear-all-memory"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let backend = HttpBackend::new(&mock_server.uri()).unwrap();
        backend.clear_all_memory().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_reads_message() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/test-connection"))
            .and(body_partial_json(json!({
                "api": "ollama",
                "settings": { "ollamaModel": "mythomax:latest" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "Ollama reachable" })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let backend = HttpBackend::new(&mock_server.uri()).unwrap();
        let request = TestConnectionRequest::for_provider(Provider::Ollama, &Settings::default());
        let message = backend.test_connection(&request).await.unwrap();
        assert_eq!(message, "Ollama reachable");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = HttpBackend::new(&format!("http://{}", addr)).unwrap();
        let err = backend.clear_all_memory().await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }
}
