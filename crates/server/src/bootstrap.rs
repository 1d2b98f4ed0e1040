use std::sync::Arc;

use cleanq_agent::{build_client, AgentRuntime};
use cleanq_core::config::{AppConfig, ConfigError, LoadOptions};
use cleanq_db::{CsvQueueStore, QueueStore, QueueStoreError, ResponseLog};
use cleanq_slack::{
    slack_api::SlackSocketTransport,
    socket::{ReconnectPolicy, SocketModeRunner, SocketTransport},
};
use thiserror::Error;
use tracing::info;

use crate::services;

pub struct Application {
    pub config: AppConfig,
    pub queue: Arc<dyn QueueStore>,
    pub agent_runtime: Arc<AgentRuntime>,
    pub transport: Arc<dyn SocketTransport>,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("generative backend client setup failed: {0}")]
    LlmClient(String),
    #[error("queue initialization failed: {0}")]
    Queue(#[from] QueueStoreError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "starting application bootstrap"
    );

    let queue: Arc<dyn QueueStore> = Arc::new(CsvQueueStore::new(&config.queue.path));
    queue.ensure_initialized().await?;
    info!(
        event_name = "system.bootstrap.queue_ready",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        path = %config.queue.path.display(),
        "queue file initialized"
    );

    let llm = build_client(&config.llm)
        .map_err(|error| BootstrapError::LlmClient(format!("{error:#}")))?;
    info!(
        event_name = "system.bootstrap.llm_client_ready",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        "generative backend client configured"
    );

    let mut runtime = AgentRuntime::new(llm, Arc::clone(&queue));
    if let Some(path) = &config.queue.response_log_path {
        runtime = runtime.with_response_log(ResponseLog::new(path));
    }
    let agent_runtime = Arc::new(runtime);

    let transport: Arc<dyn SocketTransport> = Arc::new(SlackSocketTransport::new(&config.slack));
    let slack_runner = SocketModeRunner::new(
        Arc::clone(&transport),
        services::dispatcher(Arc::clone(&agent_runtime)),
        ReconnectPolicy::default(),
    );

    Ok(Application { config, queue, agent_runtime, transport, slack_runner })
}

#[cfg(test)]
mod tests {
    use cleanq_core::config::{ConfigOverrides, LoadOptions};
    use cleanq_db::QUEUE_COLUMNS;

    use crate::bootstrap::bootstrap;

    fn options(dir: &std::path::Path, app_token: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                queue_path: Some(dir.join("clean_queue.csv")),
                response_log_path: Some(dir.join("response.log")),
                slack_app_token: Some(app_token.to_string()),
                slack_bot_token: Some("xoxb-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_required_slack_tokens() {
        let dir = tempfile::tempdir().expect("tempdir");

        let result = bootstrap(options(dir.path(), "invalid-token")).await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("slack.app_token"));
        assert!(!dir.path().join("clean_queue.csv").exists());
    }

    #[tokio::test]
    async fn bootstrap_initializes_queue_and_wires_runtime() {
        let dir = tempfile::tempdir().expect("tempdir");

        let app = bootstrap(options(dir.path(), "xapp-test")).await.expect("bootstrap");

        let contents =
            std::fs::read_to_string(dir.path().join("clean_queue.csv")).expect("queue file");
        assert_eq!(contents.trim_end(), QUEUE_COLUMNS.join(","));
        assert!(app.queue.all().await.expect("entries").is_empty());
        assert_eq!(app.agent_runtime.sessions().thread_count(), 0);
    }
}
