use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    blocks::{self, MessageTemplate},
    commands::{
        conversation_key, normalize_clean_command, CommandParseError, CommandRouteError,
        CommandRouter, CleanCommandService, SlashCommandPayload,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    SlashCommand(SlashCommandPayload),
    ChannelMessage(ChannelMessageEvent),
    AppMention(AppMentionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::ChannelMessage(_) => SlackEventType::ChannelMessage,
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    /// Conversation the event belongs to, when it belongs to one.
    pub fn conversation_key(&self) -> Option<String> {
        match self {
            Self::SlashCommand(payload) => {
                Some(conversation_key(&payload.channel_id, &payload.user_id))
            }
            Self::ChannelMessage(event) => Some(conversation_key(&event.channel_id, &event.user_id)),
            Self::AppMention(event) => Some(conversation_key(&event.channel_id, &event.user_id)),
            Self::Unsupported { .. } => None,
        }
    }

    /// Where replies to this event are posted.
    pub fn reply_target(&self) -> Option<ReplyTarget> {
        match self {
            Self::SlashCommand(payload) => {
                Some(ReplyTarget { channel_id: payload.channel_id.clone(), thread_ts: None })
            }
            Self::ChannelMessage(event) => Some(ReplyTarget {
                channel_id: event.channel_id.clone(),
                thread_ts: event.thread_ts.clone(),
            }),
            Self::AppMention(event) => Some(ReplyTarget {
                channel_id: event.channel_id.clone(),
                thread_ts: event.thread_ts.clone(),
            }),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    SlashCommand,
    ChannelMessage,
    AppMention,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelMessageEvent {
    pub channel_id: String,
    pub user_id: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppMentionEvent {
    pub channel_id: String,
    pub user_id: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel_id: String,
    pub thread_ts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(MessageTemplate),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error(transparent)]
    Route(#[from] CommandRouteError),
    #[error("channel message handler failure: {0}")]
    ChannelMessage(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;

    /// Posted before `handle` runs, for handlers that take a while.
    fn interim_reply(&self, _envelope: &SlackEnvelope) -> Option<MessageTemplate> {
        None
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub fn interim_reply(&self, envelope: &SlackEnvelope) -> Option<MessageTemplate> {
        self.handlers.get(&envelope.event.event_type())?.interim_reply(envelope)
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

pub struct SlashCommandHandler<S> {
    router: CommandRouter<S>,
}

impl<S> SlashCommandHandler<S>
where
    S: CleanCommandService,
{
    pub fn new(service: S) -> Self {
        Self { router: CommandRouter::new(service) }
    }
}

#[async_trait]
impl<S> EventHandler for SlashCommandHandler<S>
where
    S: CleanCommandService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::SlashCommand
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::SlashCommand(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let normalized = normalize_clean_command(payload.clone())?;
        let message = self.router.route(normalized).await?;
        Ok(HandlerResult::Responded(message))
    }
}

#[async_trait]
pub trait ChannelMessageService: Send + Sync {
    /// Short "working on it" line for the channel while the message is handled.
    fn acknowledgement(&self) -> Option<String> {
        None
    }

    async fn handle_channel_message(
        &self,
        event: &ChannelMessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError>;
}

pub struct ChannelMessageHandler<S> {
    service: S,
}

impl<S> ChannelMessageHandler<S>
where
    S: ChannelMessageService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for ChannelMessageHandler<S>
where
    S: ChannelMessageService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ChannelMessage
    }

    fn interim_reply(&self, envelope: &SlackEnvelope) -> Option<MessageTemplate> {
        let SlackEvent::ChannelMessage(event) = &envelope.event else {
            return None;
        };
        if event.text.trim().is_empty() {
            return None;
        }
        self.service.acknowledgement().map(|text| blocks::acknowledgement_message(&text))
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::ChannelMessage(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if event.text.trim().is_empty() {
            return Ok(HandlerResult::Processed);
        }

        let message = self.service.handle_channel_message(event, ctx).await?;
        Ok(match message {
            Some(message) => HandlerResult::Responded(message),
            None => HandlerResult::Processed,
        })
    }
}

#[async_trait]
pub trait MentionService: Send + Sync {
    async fn handle_mention(
        &self,
        event: &AppMentionEvent,
        ctx: &EventContext,
    ) -> Result<MessageTemplate, EventHandlerError>;
}

pub struct AppMentionHandler<S> {
    service: S,
}

impl<S> AppMentionHandler<S>
where
    S: MentionService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for AppMentionHandler<S>
where
    S: MentionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AppMention
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AppMention(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let message = self.service.handle_mention(event, ctx).await?;
        Ok(HandlerResult::Responded(message))
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use async_trait::async_trait;

    use super::{
        AppMentionEvent, AppMentionHandler, ChannelMessageEvent, ChannelMessageHandler,
        ChannelMessageService, EventContext, EventDispatcher, EventHandlerError, MentionService,
        SlashCommandHandler,
    };
    use crate::blocks::{reply_message, MessageTemplate};
    use crate::commands::{CleanCommandService, CommandEnvelope, CommandRouteError};

    pub(crate) const HELP: &str = "Commands: */new*, */queue*, */add-queue*";

    pub(crate) struct FixedCommandService;

    #[async_trait]
    impl CleanCommandService for FixedCommandService {
        async fn new_request(
            &self,
            _envelope: &CommandEnvelope,
        ) -> Result<MessageTemplate, CommandRouteError> {
            Ok(reply_message(":warning: I am ready to work on a new request"))
        }

        async fn add_to_queue(
            &self,
            _envelope: &CommandEnvelope,
        ) -> Result<MessageTemplate, CommandRouteError> {
            Ok(reply_message("No response from the LLM yet."))
        }

        async fn queue_status(
            &self,
            _envelope: &CommandEnvelope,
        ) -> Result<MessageTemplate, CommandRouteError> {
            Ok(reply_message("There are no requests queued up yet."))
        }
    }

    pub(crate) struct SilentMessageService;

    #[async_trait]
    impl ChannelMessageService for SilentMessageService {
        async fn handle_channel_message(
            &self,
            _event: &ChannelMessageEvent,
            _ctx: &EventContext,
        ) -> Result<Option<MessageTemplate>, EventHandlerError> {
            Ok(None)
        }
    }

    pub(crate) struct FixedHelpService;

    #[async_trait]
    impl MentionService for FixedHelpService {
        async fn handle_mention(
            &self,
            _event: &AppMentionEvent,
            _ctx: &EventContext,
        ) -> Result<MessageTemplate, EventHandlerError> {
            Ok(reply_message(HELP))
        }
    }

    /// One handler per event type, answering with fixed texts.
    pub(crate) fn fixed_dispatcher() -> EventDispatcher {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(SlashCommandHandler::new(FixedCommandService));
        dispatcher.register(ChannelMessageHandler::new(SilentMessageService));
        dispatcher.register(AppMentionHandler::new(FixedHelpService));
        dispatcher
    }
}
