use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::blocks::{self, MessageTemplate};
use crate::events::{
    DispatchError, EventContext, EventDispatcher, HandlerResult, ReplyTarget, SlackEnvelope,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport post failed: {0}")]
    Post(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn post_message(
        &self,
        target: &ReplyTarget,
        message: &MessageTemplate,
    ) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// A failed connection, and whether it had been established before failing.
struct PumpFailure {
    error: TransportError,
    was_connected: bool,
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: Arc<EventDispatcher>,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher: Arc::new(dispatcher), reconnect_policy }
    }

    /// Pumps envelopes until the transport closes cleanly or reconnects are
    /// exhausted. A connection that was up resets the retry budget, so
    /// Slack's periodic socket refreshes never count against it.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let failure = match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(failure) => failure,
            };

            if failure.was_connected {
                attempt = 0;
            }
            warn!(
                attempt,
                max_retries = self.reconnect_policy.max_retries,
                error = %failure.error,
                "socket mode transport failed"
            );

            if attempt >= self.reconnect_policy.max_retries {
                warn!(
                    max_retries = self.reconnect_policy.max_retries,
                    "socket mode retries exhausted; continuing process without crash"
                );
                return Ok(());
            }

            let delay = self.reconnect_policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), PumpFailure> {
        info!(attempt, "opening socket mode transport connection");
        self.transport
            .connect()
            .await
            .map_err(|error| PumpFailure { error, was_connected: false })?;
        info!(attempt, "socket mode transport connected");

        let mut in_flight = JoinSet::new();
        let outcome = self.pump(&mut in_flight).await;

        while let Some(joined) = in_flight.join_next().await {
            if let Err(error) = joined {
                warn!(error = %error, "envelope handler task aborted");
            }
        }

        outcome.map_err(|error| PumpFailure { error, was_connected: true })
    }

    async fn pump(&self, in_flight: &mut JoinSet<()>) -> Result<(), TransportError> {
        loop {
            // Reap finished handlers so the set does not grow without bound.
            while in_flight.try_join_next().is_some() {}

            let Some(envelope) = self.transport.next_envelope().await? else {
                info!("socket mode transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            let thread_id = envelope.event.conversation_key();

            info!(
                event_name = "ingress.slack.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                thread_id = thread_id.as_deref().unwrap_or("unknown"),
                "received slack envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    thread_id = thread_id.as_deref().unwrap_or("unknown"),
                    error = %error,
                    "failed to acknowledge slack envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    thread_id = thread_id.as_deref().unwrap_or("unknown"),
                    "acknowledged slack envelope"
                );
            }

            let transport = Arc::clone(&self.transport);
            let dispatcher = Arc::clone(&self.dispatcher);
            in_flight.spawn(async move {
                handle_envelope(transport, dispatcher, envelope).await;
            });
        }
    }
}

async fn handle_envelope(
    transport: Arc<dyn SocketTransport>,
    dispatcher: Arc<EventDispatcher>,
    envelope: SlackEnvelope,
) {
    let thread_id = envelope.event.conversation_key();
    let target = envelope.event.reply_target();
    let context = EventContext { correlation_id: envelope.envelope_id.clone() };

    if let (Some(target), Some(interim)) = (&target, dispatcher.interim_reply(&envelope)) {
        post(transport.as_ref(), target, &interim, &envelope.envelope_id).await;
    }

    let reply = match dispatcher.dispatch(&envelope, &context).await {
        Ok(HandlerResult::Responded(message)) => Some(message),
        Ok(HandlerResult::Processed | HandlerResult::Ignored) => None,
        Err(error) => {
            warn!(
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                thread_id = thread_id.as_deref().unwrap_or("unknown"),
                error = %error,
                "event dispatch failed; continuing socket loop"
            );
            Some(blocks::error_message(
                "Something went wrong while handling that. Please try again.",
                &envelope.envelope_id,
            ))
        }
    };

    if let (Some(target), Some(reply)) = (&target, reply) {
        post(transport.as_ref(), target, &reply, &envelope.envelope_id).await;
    }
}

async fn post(
    transport: &dyn SocketTransport,
    target: &ReplyTarget,
    message: &MessageTemplate,
    envelope_id: &str,
) {
    if let Err(error) = transport.post_message(target, message).await {
        warn!(
            event_name = "egress.slack.post_failed",
            envelope_id,
            correlation_id = envelope_id,
            channel_id = %target.channel_id,
            error = %error,
            "failed to post slack reply"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::{ReconnectPolicy, SocketModeRunner, SocketTransport, TransportError};
    use crate::blocks::MessageTemplate;
    use crate::events::fakes::fixed_dispatcher;
    use crate::events::{
        ChannelMessageEvent, EventDispatcher, ReplyTarget, SlackEnvelope, SlackEvent,
    };
    use crate::commands::SlashCommandPayload;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<SlackEnvelope>, TransportError>>,
        disconnect_results: VecDeque<Result<(), TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        posts: Vec<(ReplyTarget, String)>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<SlackEnvelope>, TransportError>>,
            disconnect_results: Vec<Result<(), TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    disconnect_results: disconnect_results.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }

        async fn posts(&self) -> Vec<(ReplyTarget, String)> {
            self.state.lock().await.posts.clone()
        }

        async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl SocketTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn post_message(
            &self,
            target: &ReplyTarget,
            message: &MessageTemplate,
        ) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.posts.push((target.clone(), message.fallback_text.clone()));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            state.disconnect_results.pop_front().unwrap_or(Ok(()))
        }
    }

    fn policy(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![
                Ok(Some(SlackEnvelope {
                    envelope_id: "env-1".to_owned(),
                    event: SlackEvent::Unsupported { event_type: "test".to_owned() },
                })),
                Ok(None),
            ],
            vec![Ok(())],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), EventDispatcher::default(), policy(2));

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-1"]);
        assert_eq!(transport.disconnect_calls().await, 1);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
            vec![],
        ));

        let runner =
            SocketModeRunner::new(transport.clone(), EventDispatcher::default(), policy(2));

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn dropped_connection_that_was_up_resets_retry_budget() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(()), Ok(())],
            vec![
                Err(TransportError::Receive("refresh-1".to_owned())),
                Err(TransportError::Receive("refresh-2".to_owned())),
                Ok(None),
            ],
            vec![Ok(())],
        ));

        let runner = SocketModeRunner::new(transport.clone(), EventDispatcher::default(), policy(1));

        runner.start().await.expect("runner should not fail");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn responded_messages_are_posted_to_the_event_channel() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(SlackEnvelope {
                    envelope_id: "env-cmd".to_owned(),
                    event: SlackEvent::SlashCommand(SlashCommandPayload {
                        command: "/new".to_owned(),
                        text: String::new(),
                        channel_id: "C9".to_owned(),
                        user_id: "U9".to_owned(),
                        trigger_ts: "1".to_owned(),
                        request_id: "req-9".to_owned(),
                    }),
                })),
                Ok(Some(SlackEnvelope {
                    envelope_id: "env-msg".to_owned(),
                    event: SlackEvent::ChannelMessage(ChannelMessageEvent {
                        channel_id: "C9".to_owned(),
                        user_id: "U9".to_owned(),
                        ts: "2".to_owned(),
                        thread_ts: None,
                        text: "noise".to_owned(),
                    }),
                })),
                Ok(None),
            ],
            vec![Ok(())],
        ));

        let runner = SocketModeRunner::new(transport.clone(), fixed_dispatcher(), policy(0));
        runner.start().await.expect("runner should not fail");

        let posts = transport.posts().await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, ReplyTarget { channel_id: "C9".to_owned(), thread_ts: None });
        assert!(posts[0].1.contains("ready to work on a new request"));
    }
}
