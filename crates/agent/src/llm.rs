use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cleanq_core::config::{LlmConfig, LlmProvider};
use cleanq_core::domain::dialogue::DialogueTurn;

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434";
const RETRY_BASE_DELAY_MS: u64 = 250;

/// One backend call: fixed instructions, the thread's prior turns replayed in
/// full, and the new message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub history: Vec<DialogueTurn>,
    pub message: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

fn chat_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);
    messages.push(ChatMessage { role: "system", content: request.system.clone() });
    messages.extend(
        request
            .history
            .iter()
            .map(|turn| ChatMessage { role: turn.role.as_str(), content: turn.text.clone() }),
    );
    messages.push(ChatMessage { role: "user", content: request.message.clone() });
    messages
}

pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("failed to build llm http client")?;

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::Ollama => Arc::new(OllamaClient {
            http,
            base_url: trim_base_url(config.base_url.as_deref().unwrap_or(OLLAMA_DEFAULT_BASE_URL)),
            model: config.model.clone(),
            max_retries: config.max_retries,
        }),
        LlmProvider::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| anyhow!("llm.api_key is required for the openai provider"))?;
            Arc::new(OpenAiClient {
                http,
                base_url: trim_base_url(
                    config.base_url.as_deref().unwrap_or(OPENAI_DEFAULT_BASE_URL),
                ),
                api_key,
                model: config.model.clone(),
                max_retries: config.max_retries,
            })
        }
    };

    Ok(client)
}

fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Local model served by Ollama's `/api/chat` endpoint.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct OllamaChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

impl OllamaClient {
    async fn send(&self, request: &CompletionRequest) -> Result<String> {
        let body = OllamaChatBody {
            model: &self.model,
            messages: chat_messages(request),
            stream: false,
            options: OllamaOptions { temperature: 0.0 },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .context("ollama request failed")?;

        let status = response.status();
        let body_text = response.text().await.context("ollama response body unreadable")?;
        if !status.is_success() {
            bail!("ollama returned {status}: {body_text}");
        }

        let parsed: OllamaChatResponse =
            serde_json::from_str(&body_text).context("ollama response is not a chat reply")?;
        Ok(parsed.message.content)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        with_retries("ollama", self.max_retries, || self.send(request)).await
    }
}

/// Any endpoint speaking the OpenAI chat-completions dialect.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct OpenAiChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    async fn send(&self, request: &CompletionRequest) -> Result<String> {
        let body = OpenAiChatBody {
            model: &self.model,
            messages: chat_messages(request),
            temperature: 0.0,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("openai request failed")?;

        let status = response.status();
        let body_text = response.text().await.context("openai response body unreadable")?;
        if !status.is_success() {
            bail!("openai returned {status}: {body_text}");
        }

        let parsed: OpenAiChatResponse =
            serde_json::from_str(&body_text).context("openai response is not a chat completion")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("openai response has no message content"))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        with_retries("openai", self.max_retries, || self.send(request)).await
    }
}

async fn with_retries<F, Fut>(provider: &'static str, max_retries: u32, mut attempt: F) -> Result<String>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String>>,
{
    let mut tries = 0u32;
    loop {
        match attempt().await {
            Ok(reply) => {
                debug!(provider, attempts = tries + 1, reply_len = reply.len(), "llm reply received");
                return Ok(reply);
            }
            Err(error) if tries < max_retries => {
                let delay = Duration::from_millis(RETRY_BASE_DELAY_MS << tries.min(4));
                warn!(
                    event_name = "agent.llm.retry",
                    provider,
                    attempt = tries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "llm call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                tries += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use cleanq_core::config::{LlmConfig, LlmProvider};
    use cleanq_core::domain::dialogue::DialogueTurn;

    use super::{build_client, chat_messages, CompletionRequest};

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "extract".to_string(),
            history: vec![DialogueTurn::user("first"), DialogueTurn::assistant("Retail name: A")],
            message: "second".to_string(),
        }
    }

    fn config(provider: LlmProvider, base_url: String, max_retries: u32) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: Some("sk-test".to_string().into()),
            base_url: Some(base_url),
            model: "llama3".to_string(),
            timeout_secs: 5,
            max_retries,
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{address}")
    }

    #[test]
    fn messages_replay_history_between_system_and_new_message() {
        let roles = chat_messages(&request()).iter().map(|message| message.role).collect::<Vec<_>>();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[tokio::test]
    async fn ollama_client_posts_chat_and_reads_message_content() {
        let router = Router::new().route(
            "/api/chat",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "llama3");
                assert_eq!(body["stream"], false);
                assert_eq!(body["messages"][3]["content"], "second");
                Json(json!({ "message": { "role": "assistant", "content": "Retail name: Depot" } }))
            }),
        );
        let base_url = serve(router).await;

        let client = build_client(&config(LlmProvider::Ollama, base_url, 0)).expect("client");
        let reply = client.complete(&request()).await.expect("reply");

        assert_eq!(reply, "Retail name: Depot");
    }

    #[tokio::test]
    async fn openai_client_retries_server_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/chat/completions",
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "busy" })));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({ "choices": [{ "message": { "content": "Missing info" } }] })),
                    )
                }),
            )
            .with_state(Arc::clone(&calls));
        let base_url = serve(router).await;

        let client = build_client(&config(LlmProvider::OpenAi, base_url, 1)).expect("client");
        let reply = client.complete(&request()).await.expect("reply after retry");

        assert_eq!(reply, "Missing info");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_last_error() {
        let router = Router::new()
            .route("/api/chat", post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }));
        let base_url = serve(router).await;

        let client = build_client(&config(LlmProvider::Ollama, base_url, 1)).expect("client");
        let error = client.complete(&request()).await.expect_err("should fail");

        assert!(error.to_string().contains("502"));
    }
}
