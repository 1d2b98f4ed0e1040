use std::sync::Arc;

use async_trait::async_trait;
use cleanq_agent::{AgentRuntime, ThreadId};
use cleanq_slack::{
    blocks::{reply_message, MessageTemplate},
    commands::{conversation_key, CleanCommandService, CommandEnvelope, CommandRouteError},
    events::{
        AppMentionEvent, AppMentionHandler, ChannelMessageEvent, ChannelMessageHandler,
        ChannelMessageService, EventContext, EventDispatcher, EventHandlerError, MentionService,
        SlashCommandHandler,
    },
};

/// Wires every Slack handler to the same runtime.
pub fn dispatcher(runtime: Arc<AgentRuntime>) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(SlashCommandHandler::new(RuntimeCommandService::new(Arc::clone(&runtime))));
    dispatcher
        .register(ChannelMessageHandler::new(RuntimeMessageService::new(Arc::clone(&runtime))));
    dispatcher.register(AppMentionHandler::new(RuntimeMentionService::new(runtime)));
    dispatcher
}

pub struct RuntimeCommandService {
    runtime: Arc<AgentRuntime>,
}

impl RuntimeCommandService {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl CleanCommandService for RuntimeCommandService {
    async fn new_request(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<MessageTemplate, CommandRouteError> {
        let thread = ThreadId(envelope.conversation_key.clone());
        Ok(reply_message(&self.runtime.on_new(&thread).await))
    }

    async fn add_to_queue(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<MessageTemplate, CommandRouteError> {
        let thread = ThreadId(envelope.conversation_key.clone());
        let (_, message) = self.runtime.on_commit(&thread).await;
        Ok(reply_message(&message))
    }

    async fn queue_status(
        &self,
        _envelope: &CommandEnvelope,
    ) -> Result<MessageTemplate, CommandRouteError> {
        Ok(reply_message(&self.runtime.on_queue_status().await))
    }
}

pub struct RuntimeMessageService {
    runtime: Arc<AgentRuntime>,
}

impl RuntimeMessageService {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl ChannelMessageService for RuntimeMessageService {
    fn acknowledgement(&self) -> Option<String> {
        Some(self.runtime.acknowledgement().to_owned())
    }

    async fn handle_channel_message(
        &self,
        event: &ChannelMessageEvent,
        _ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError> {
        let thread = ThreadId(conversation_key(&event.channel_id, &event.user_id));
        let text = match self.runtime.on_message(&thread, &event.text).await {
            Ok(reply) => reply,
            Err(error) => error.user_message(),
        };
        Ok(Some(reply_message(&text)))
    }
}

pub struct RuntimeMentionService {
    runtime: Arc<AgentRuntime>,
}

impl RuntimeMentionService {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl MentionService for RuntimeMentionService {
    async fn handle_mention(
        &self,
        _event: &AppMentionEvent,
        _ctx: &EventContext,
    ) -> Result<MessageTemplate, EventHandlerError> {
        Ok(reply_message(&self.runtime.on_mention()))
    }
}
