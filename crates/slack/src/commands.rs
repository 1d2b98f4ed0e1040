use async_trait::async_trait;
use thiserror::Error;

use crate::blocks::MessageTemplate;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashCommandPayload {
    pub command: String,
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    pub trigger_ts: String,
    pub request_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanCommand {
    /// Discard the conversation and start a new request.
    New,
    /// Commit the latest extraction to the queue.
    AddQueue,
    /// Show the current queue.
    Queue,
}

impl CleanCommand {
    pub fn slash_name(&self) -> &'static str {
        match self {
            Self::New => "/new",
            Self::AddQueue => "/add-queue",
            Self::Queue => "/queue",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub command: CleanCommand,
    pub conversation_key: String,
    pub channel_id: String,
    pub user_id: String,
    pub trigger_ts: String,
    pub request_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unsupported slash command: {0}")]
    UnsupportedCommand(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandRouteError {
    #[error("command service failed: {0}")]
    Service(String),
}

pub fn parse_clean_command(command: &str) -> Option<CleanCommand> {
    let normalized = command.trim().trim_start_matches('/').to_ascii_lowercase();
    match normalized.as_str() {
        "new" => Some(CleanCommand::New),
        "add-queue" | "add_queue" | "addqueue" => Some(CleanCommand::AddQueue),
        "queue" => Some(CleanCommand::Queue),
        _ => None,
    }
}

/// Slash commands and channel messages from the same person in the same
/// channel belong to one conversation.
///
/// Slash command payloads carry no `thread_ts`, so the key cannot include the
/// thread. Two threads opened by one person in one channel therefore share a
/// single session and a single pending candidate; `/new` resets both.
pub fn conversation_key(channel_id: &str, user_id: &str) -> String {
    format!("{channel_id}:{user_id}")
}

pub fn normalize_clean_command(
    payload: SlashCommandPayload,
) -> Result<CommandEnvelope, CommandParseError> {
    let command = parse_clean_command(&payload.command)
        .ok_or_else(|| CommandParseError::UnsupportedCommand(payload.command.clone()))?;

    Ok(CommandEnvelope {
        command,
        conversation_key: conversation_key(&payload.channel_id, &payload.user_id),
        channel_id: payload.channel_id,
        user_id: payload.user_id,
        trigger_ts: payload.trigger_ts,
        request_id: payload.request_id,
    })
}

pub struct CommandRouter<S> {
    service: S,
}

impl<S> CommandRouter<S>
where
    S: CleanCommandService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub async fn route(
        &self,
        envelope: CommandEnvelope,
    ) -> Result<MessageTemplate, CommandRouteError> {
        match envelope.command {
            CleanCommand::New => self.service.new_request(&envelope).await,
            CleanCommand::AddQueue => self.service.add_to_queue(&envelope).await,
            CleanCommand::Queue => self.service.queue_status(&envelope).await,
        }
    }
}

#[async_trait]
pub trait CleanCommandService: Send + Sync {
    async fn new_request(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<MessageTemplate, CommandRouteError>;

    async fn add_to_queue(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<MessageTemplate, CommandRouteError>;

    async fn queue_status(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<MessageTemplate, CommandRouteError>;
}
