//! Agent runtime - conversation handling around the generative backend
//!
//! This crate owns everything between a chat message arriving and a record
//! landing in the queue:
//! - Calls the backend with the extraction instructions and the thread's history
//! - Holds the latest reply per conversation thread as the commit candidate
//! - Parses, appends, and summarizes on commit
//!
//! # Key Types
//!
//! - `AgentRuntime` - handlers for new, message, commit, queue status, and mention
//! - `SessionManager` - per-thread dialogue history and candidate
//! - `LlmClient` - pluggable backend trait with Ollama and OpenAI-compatible clients
//!
//! # Safety Principle
//!
//! The backend only translates free text into labeled categories. Whether a
//! reply is committable is decided here, by parsing it.

pub mod llm;
pub mod runtime;
pub mod session;

pub use llm::{build_client, CompletionRequest, LlmClient};
pub use runtime::AgentRuntime;
pub use session::{PendingExtraction, SessionManager, SessionState, ThreadId};
