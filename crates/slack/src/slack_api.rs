//! Socket Mode transport backed by the Slack Web API.
//!
//! `apps.connections.open` hands out a websocket URL for the app token; every
//! envelope on that socket is acknowledged by echoing its `envelope_id`.
//! Replies go out over `chat.postMessage` with the bot token.

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use cleanq_core::config::SlackConfig;

use crate::{
    blocks::{Block, MessageTemplate},
    commands::SlashCommandPayload,
    events::{AppMentionEvent, ChannelMessageEvent, ReplyTarget, SlackEnvelope, SlackEvent},
    socket::{SocketTransport, TransportError},
};

pub const SLACK_API_BASE: &str = "https://slack.com/api";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct SlackSocketTransport {
    http: reqwest::Client,
    api_base: String,
    app_token: SecretString,
    bot_token: SecretString,
    bot_user_id: Mutex<Option<String>>,
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
}

impl SlackSocketTransport {
    pub fn new(config: &SlackConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: SLACK_API_BASE.to_owned(),
            app_token: config.app_token.clone(),
            bot_token: config.bot_token.clone(),
            bot_user_id: Mutex::new(None),
            sink: Mutex::new(None),
            stream: Mutex::new(None),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    async fn call(
        &self,
        method: &str,
        token: &SecretString,
        body: &impl Serialize,
    ) -> Result<ApiResponse, String> {
        let response = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| format!("{method}: {error}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("{method}: http status {status}"));
        }

        let parsed: ApiResponse =
            response.json().await.map_err(|error| format!("{method}: {error}"))?;
        if !parsed.ok {
            return Err(format!(
                "{method}: {}",
                parsed.error.as_deref().unwrap_or("unknown_error")
            ));
        }
        Ok(parsed)
    }

    async fn open_socket_url(&self) -> Result<String, TransportError> {
        let response = self
            .call("apps.connections.open", &self.app_token, &serde_json::json!({}))
            .await
            .map_err(TransportError::Connect)?;
        response
            .url
            .ok_or_else(|| TransportError::Connect("apps.connections.open: missing url".to_owned()))
    }

    async fn resolve_bot_user_id(&self) -> Result<(), TransportError> {
        let mut cached = self.bot_user_id.lock().await;
        if cached.is_some() {
            return Ok(());
        }
        let response = self
            .call("auth.test", &self.bot_token, &serde_json::json!({}))
            .await
            .map_err(TransportError::Connect)?;
        *cached = response.user_id;
        Ok(())
    }
}

#[async_trait]
impl SocketTransport for SlackSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.resolve_bot_user_id().await?;
        let url = self.open_socket_url().await?;

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (sink, stream) = ws_stream.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        let bot_user_id = self.bot_user_id.lock().await.clone();
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Ok(None);
        };

        while let Some(frame) = stream.next().await {
            let frame = frame.map_err(|error| TransportError::Receive(error.to_string()))?;
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(TransportError::Receive("socket closed by slack".to_owned()))
                }
                _ => continue,
            };

            match parse_socket_frame(text.as_str(), bot_user_id.as_deref()) {
                Ok(SocketFrame::Hello) => info!("socket mode hello received"),
                Ok(SocketFrame::Disconnect { reason }) => {
                    return Err(TransportError::Receive(format!(
                        "slack requested reconnect: {reason}"
                    )));
                }
                Ok(SocketFrame::Envelope(envelope)) => return Ok(Some(envelope)),
                Ok(SocketFrame::Other { frame_type }) => {
                    debug!(frame_type, "ignoring socket mode frame");
                }
                Err(error) => warn!(error = %error, "unparseable socket mode frame"),
            }
        }

        Err(TransportError::Receive("socket stream ended".to_owned()))
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(TransportError::Acknowledge("socket not connected".to_owned()));
        };
        let ack = serde_json::json!({ "envelope_id": envelope_id }).to_string();
        sink.send(Message::Text(ack.into()))
            .await
            .map_err(|error| TransportError::Acknowledge(error.to_string()))
    }

    async fn post_message(
        &self,
        target: &ReplyTarget,
        message: &MessageTemplate,
    ) -> Result<(), TransportError> {
        let body = PostMessageRequest {
            channel: &target.channel_id,
            thread_ts: target.thread_ts.as_deref(),
            text: &message.fallback_text,
            blocks: &message.blocks,
        };
        self.call("chat.postMessage", &self.bot_token, &body)
            .await
            .map(|_| ())
            .map_err(TransportError::Post)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.stream.lock().await.take();
        let Some(mut sink) = self.sink.lock().await.take() else {
            return Ok(());
        };
        sink.close().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
    text: &'a str,
    blocks: &'a [Block],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrame {
    Hello,
    Disconnect { reason: String },
    Envelope(SlackEnvelope),
    Other { frame_type: String },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsApiPayload {
    event: RawEvent,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    user: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSlashCommand {
    command: String,
    #[serde(default)]
    text: String,
    channel_id: String,
    user_id: String,
    #[serde(default)]
    trigger_id: String,
}

/// Decodes one Socket Mode frame. Messages posted by bots, edits and other
/// subtyped messages, and messages that mention the bot (those arrive again
/// as `app_mention`) come back as unsupported envelopes so they are still
/// acknowledged but never reach the pipeline.
pub fn parse_socket_frame(
    text: &str,
    bot_user_id: Option<&str>,
) -> Result<SocketFrame, serde_json::Error> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let envelope_id = raw.envelope_id.unwrap_or_default();

    let event = match raw.frame_type.as_str() {
        "hello" => return Ok(SocketFrame::Hello),
        "disconnect" => {
            return Ok(SocketFrame::Disconnect {
                reason: raw.reason.unwrap_or_else(|| "unspecified".to_owned()),
            })
        }
        "slash_commands" => {
            let command: RawSlashCommand =
                serde_json::from_value(raw.payload.unwrap_or(Value::Null))?;
            SlackEvent::SlashCommand(SlashCommandPayload {
                command: command.command,
                text: command.text,
                channel_id: command.channel_id,
                user_id: command.user_id,
                trigger_ts: command.trigger_id,
                request_id: envelope_id.clone(),
            })
        }
        "events_api" => {
            let payload: EventsApiPayload =
                serde_json::from_value(raw.payload.unwrap_or(Value::Null))?;
            classify_event(payload.event, bot_user_id)
        }
        other => return Ok(SocketFrame::Other { frame_type: other.to_owned() }),
    };

    Ok(SocketFrame::Envelope(SlackEnvelope { envelope_id, event }))
}

fn classify_event(event: RawEvent, bot_user_id: Option<&str>) -> SlackEvent {
    match event.event_type.as_str() {
        "app_mention" => SlackEvent::AppMention(AppMentionEvent {
            channel_id: event.channel,
            user_id: event.user,
            ts: event.ts,
            thread_ts: event.thread_ts,
            text: event.text,
        }),
        "message" => {
            if event.bot_id.is_some() || event.subtype.is_some() || event.user.is_empty() {
                return SlackEvent::Unsupported { event_type: "message.skipped".to_owned() };
            }
            if let Some(bot) = bot_user_id {
                if event.user == bot || event.text.contains(&format!("<@{bot}>")) {
                    return SlackEvent::Unsupported { event_type: "message.skipped".to_owned() };
                }
            }
            SlackEvent::ChannelMessage(ChannelMessageEvent {
                channel_id: event.channel,
                user_id: event.user,
                ts: event.ts,
                thread_ts: event.thread_ts,
                text: event.text,
            })
        }
        other => SlackEvent::Unsupported { event_type: other.to_owned() },
    }
}
