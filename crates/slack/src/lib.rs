//! Slack Integration - Socket Mode bot interface
//!
//! This crate is the chat surface for cleanq:
//! - **Socket Mode** (`socket`) - event loop with reconnection logic
//! - **Slack API** (`slack_api`) - websocket transport plus `chat.postMessage`
//! - **Slash Commands** (`commands`) - `/new`, `/add-queue`, `/queue`
//! - **Events** (`events`) - channel messages and app mentions
//! - **Block Kit** (`blocks`) - reply, acknowledgement and error messages
//!
//! # Getting Started
//!
//! 1. Create a Slack app at https://api.slack.com/apps
//! 2. Enable Socket Mode and subscribe to `message.channels` and `app_mention`
//! 3. Add slash commands: `/new`, `/add-queue`, `/queue`
//! 4. Set env vars: `CLEANQ_SLACK_APP_TOKEN`, `CLEANQ_SLACK_BOT_TOKEN`
//!
//! # Architecture
//!
//! ```text
//! Slack Events → EventDispatcher → Handlers → Agent Runtime → Queue file
//!                    ↓
//!              Block Kit reply ← chat.postMessage
//! ```

pub mod blocks;
pub mod commands;
pub mod events;
pub mod slack_api;
pub mod socket;
