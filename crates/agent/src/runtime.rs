use std::sync::Arc;

use chrono::{Local, NaiveDate};
use rand::seq::SliceRandom;
use tracing::{info, warn};

use cleanq_core::domain::record::QueueEntry;
use cleanq_core::errors::{FieldNormalizationError, PipelineError};
use cleanq_core::extraction::{is_incomplete_date_signal, parse_reply, ExtractionProtocol};
use cleanq_core::presenter;
use cleanq_db::{QueueStore, ResponseLog};

use crate::llm::{CompletionRequest, LlmClient};
use crate::session::{PendingExtraction, SessionManager, ThreadId};

pub const COMMIT_SUCCESS: &str = "Request pushed to the queue successfully! :rocket:";
pub const EMPTY_QUEUE: &str = "There are no requests queued up yet. Please create one first by \
adding a request to a queue using the */add-queue* command";

const ACKNOWLEDGEMENTS: [&str; 10] = [
    "I'm working on it right now.",
    "Handling it as we speak.",
    "Working on it, please hold tight.",
    "I'm on it, just a moment.",
    "In progress, hang tight.",
    "Taking care of it now.",
    "Currently working on it, please wait.",
    "Working on that for you now.",
    "I'm handling that, one moment please.",
    "I'm getting that sorted out now.",
];

const HELP_TEXT: &str = "Hi there, here are the available commands you can use on me:\n\
:pushpin:  */new* - Start a new session with me\n\
:pushpin:  */queue* - Check current queue status\n\
:pushpin:  */add-queue* - Add the completed message request to the queue\n\n\
Send me your clean request message and I'll try my best to extract the important information for you.";

type Clock = Box<dyn Fn() -> NaiveDate + Send + Sync>;

/// Drives the extraction-to-queue pipeline for every conversation thread.
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    queue: Arc<dyn QueueStore>,
    sessions: SessionManager,
    response_log: Option<ResponseLog>,
    today: Clock,
}

impl AgentRuntime {
    pub fn new(llm: Arc<dyn LlmClient>, queue: Arc<dyn QueueStore>) -> Self {
        Self {
            llm,
            queue,
            sessions: SessionManager::default(),
            response_log: None,
            today: Box::new(|| Local::now().date_naive()),
        }
    }

    pub fn with_response_log(mut self, response_log: ResponseLog) -> Self {
        self.response_log = Some(response_log);
        self
    }

    pub fn with_clock<F>(mut self, today: F) -> Self
    where
        F: Fn() -> NaiveDate + Send + Sync + 'static,
    {
        self.today = Box::new(today);
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn queue(&self) -> &Arc<dyn QueueStore> {
        &self.queue
    }

    /// Short status line posted while the backend works on a message.
    pub fn acknowledgement(&self) -> &'static str {
        ACKNOWLEDGEMENTS.choose(&mut rand::thread_rng()).copied().unwrap_or(ACKNOWLEDGEMENTS[0])
    }

    pub async fn on_new(&self, thread: &ThreadId) -> String {
        let acknowledgement = self.sessions.reset(thread).await;
        info!(
            event_name = "agent.session.reset",
            correlation_id = %thread,
            thread_id = %thread,
            "conversation reset"
        );
        acknowledgement.to_string()
    }

    /// Sends the message to the backend with the thread's history and holds
    /// the reply as the commit candidate. Backend failures leave the thread
    /// exactly as it was.
    pub async fn on_message(&self, thread: &ThreadId, text: &str) -> Result<String, PipelineError> {
        let session = self.sessions.get_or_create(thread);
        let (history, epoch) = {
            let state = session.lock().await;
            (state.history().to_vec(), state.epoch())
        };

        let request = CompletionRequest {
            system: ExtractionProtocol::new((self.today)()).instructions(),
            history,
            message: text.to_string(),
        };

        let reply = match self.llm.complete(&request).await {
            Ok(reply) => reply.trim().to_string(),
            Err(error) => {
                warn!(
                    event_name = "agent.llm.unreachable",
                    correlation_id = %thread,
                    thread_id = %thread,
                    error = %format!("{error:#}"),
                    "generative backend call failed"
                );
                return Err(PipelineError::BackendUnreachable(format!("{error:#}")));
            }
        };

        if let Some(response_log) = &self.response_log {
            if let Err(error) = response_log.record(text, &reply).await {
                warn!(
                    event_name = "agent.response_log.write_failed",
                    path = %response_log.path().display(),
                    error = %error,
                    "could not append to response log"
                );
            }
        }

        let incomplete_date = is_incomplete_date_signal(&reply);
        {
            let mut state = session.lock().await;
            if state.epoch() != epoch {
                info!(
                    event_name = "agent.reply.discarded",
                    correlation_id = %thread,
                    thread_id = %thread,
                    "conversation was reset while the backend was working"
                );
                return Ok(reply);
            }

            state.push_exchange(text, &reply);
            let candidate = (!incomplete_date).then(|| PendingExtraction::new(reply.clone()));
            state.set_candidate(candidate);
        }

        info!(
            event_name = "agent.extraction.received",
            correlation_id = %thread,
            thread_id = %thread,
            incomplete_date,
            reply_len = reply.len(),
            "backend reply held as candidate"
        );
        Ok(reply)
    }

    /// Commits the thread's candidate. Returns whether a queue entry was
    /// written and the message to post back.
    pub async fn on_commit(&self, thread: &ThreadId) -> (bool, String) {
        match self.commit(thread).await {
            Ok(summary) => (true, summary),
            Err(error) => {
                if !error.is_informational() {
                    warn!(
                        event_name = "agent.commit.failed",
                        correlation_id = %thread,
                        thread_id = %thread,
                        error = %error,
                        "commit rejected"
                    );
                }
                (false, error.user_message())
            }
        }
    }

    /// Read candidate, parse, append, clear. The thread's lock is held for
    /// the whole sequence, so a concurrent commit on the same thread waits
    /// and then finds nothing to commit.
    pub async fn commit(&self, thread: &ThreadId) -> Result<String, PipelineError> {
        let session = self.sessions.get_or_create(thread);
        let mut state = session.lock().await;

        let candidate = state.candidate().cloned().ok_or(PipelineError::NoPendingCandidate)?;
        let parsed = parse_reply(&candidate.reply)?;

        self.queue.ensure_initialized().await?;
        let entry = QueueEntry::new((self.today)(), parsed.record);
        self.queue.append(entry).await?;
        state.clear();
        drop(state);

        info!(
            event_name = "agent.commit.appended",
            correlation_id = %thread,
            thread_id = %thread,
            warnings = parsed.warnings.len(),
            "request appended to queue"
        );

        let mut message = COMMIT_SUCCESS.to_string();
        match self.queue.all().await {
            Ok(entries) => {
                message.push_str("\n:warning: Here is a summary of the current queue:\n```\n");
                message.push_str(&presenter::render(&entries));
                message.push_str("\n```");
            }
            Err(error) => {
                warn!(
                    event_name = "agent.queue.read_failed",
                    error = %error,
                    "queue summary unavailable after commit"
                );
            }
        }
        if !parsed.warnings.is_empty() {
            message.push('\n');
            message.push_str(&warning_block(&parsed.warnings));
        }

        Ok(message)
    }

    pub async fn on_queue_status(&self) -> String {
        let entries = match self.queue.all().await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(event_name = "agent.queue.read_failed", error = %error, "queue status failed");
                return PipelineError::from(error).user_message();
            }
        };

        if entries.is_empty() {
            return EMPTY_QUEUE.to_string();
        }

        format!(
            ":warning: Here are the request(s) in the queue:\n```\n{}\n```",
            presenter::render(&entries)
        )
    }

    pub fn on_mention(&self) -> String {
        HELP_TEXT.to_string()
    }
}

fn warning_block(warnings: &[FieldNormalizationError]) -> String {
    let mut block = ":warning: Some values were saved as written because they could not be \
normalized:"
        .to_string();
    for warning in warnings {
        block.push_str("\n• ");
        block.push_str(&warning.to_string());
    }
    block
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    use cleanq_core::domain::dialogue::DialogueRole;
    use cleanq_core::domain::record::FieldValue;
    use cleanq_core::errors::PipelineError;
    use cleanq_db::{CsvQueueStore, InMemoryQueueStore, QueueStore, ResponseLog};

    use super::{AgentRuntime, COMMIT_SUCCESS, EMPTY_QUEUE};
    use crate::llm::{CompletionRequest, LlmClient};
    use crate::session::{ThreadId, RESET_ACKNOWLEDGEMENT};

    const FULL_REPLY: &str = "Retail name: Sunrise Mart\n\
Floor size: 2400 sqft\n\
Supervisor: Dana Ortiz\n\
Supervisor contact: 123-456-7890 ext: 2\n\
Date: 2026-11-02\n\
Cleans: 2\n\
Touch-ups: 1\n\
Cleaning requirements:\n\
• Strip and wax\n\
• Window washing";

    #[derive(Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedLlm {
        fn with(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), requests: Mutex::default() })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.requests.lock().expect("requests lock").push(request.clone());
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no scripted reply left")))
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date")
    }

    fn runtime(llm: Arc<ScriptedLlm>, queue: Arc<dyn QueueStore>) -> AgentRuntime {
        AgentRuntime::new(llm, queue).with_clock(today)
    }

    #[tokio::test]
    async fn message_then_commit_appends_entry_and_summarizes_queue() {
        let llm = ScriptedLlm::with(vec![Ok(FULL_REPLY.to_string())]);
        let queue = Arc::new(InMemoryQueueStore::default());
        let runtime = runtime(llm, queue.clone());
        let thread = ThreadId::from("T1");

        let reply = runtime.on_message(&thread, "Sunrise Mart needs 2.4K sqft").await.expect("reply");
        assert_eq!(reply, FULL_REPLY);

        let (ok, summary) = runtime.on_commit(&thread).await;
        assert!(ok);
        assert!(summary.starts_with(COMMIT_SUCCESS));
        assert!(summary.contains("10/16/2026 | Sunrise Mart | 2400 | 11/02/2026"));

        let entries = queue.all().await.expect("all");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].date_added, today());
        assert_eq!(entries[0].record.supervisor_contact.as_deref(), Some("123-456-7890 ext: 2"));
        assert_eq!(entries[0].record.requirements, vec!["Strip and wax", "Window washing"]);

        let session = runtime.sessions().get_or_create(&thread);
        assert!(session.lock().await.history().is_empty());
    }

    #[tokio::test]
    async fn history_is_replayed_on_follow_up_messages() {
        let llm = ScriptedLlm::with(vec![Ok("Missing info".to_string()), Ok(FULL_REPLY.to_string())]);
        let runtime = runtime(llm.clone(), Arc::new(InMemoryQueueStore::default()));
        let thread = ThreadId::from("T1");

        runtime.on_message(&thread, "clean sunrise mart").await.expect("first");
        runtime.on_message(&thread, "start on Nov 2").await.expect("second");

        let requests = llm.requests();
        assert!(requests[0].history.is_empty());
        assert!(requests[0].system.contains("Today's date is 2026-10-16"));
        assert_eq!(requests[1].history.len(), 2);
        assert_eq!(requests[1].history[0].role, DialogueRole::User);
        assert_eq!(requests[1].history[1].text, "Missing info");
    }

    #[tokio::test]
    async fn commit_without_extraction_is_informational() {
        let runtime = runtime(ScriptedLlm::with(Vec::new()), Arc::new(InMemoryQueueStore::default()));

        let (ok, message) = runtime.on_commit(&ThreadId::from("T1")).await;

        assert!(!ok);
        assert_eq!(message, "No response from the LLM yet.");
    }

    #[tokio::test]
    async fn incomplete_date_reply_is_not_committable() {
        let llm = ScriptedLlm::with(vec![Ok("Missing info".to_string())]);
        let queue = Arc::new(InMemoryQueueStore::default());
        let runtime = runtime(llm, queue.clone());
        let thread = ThreadId::from("T1");

        runtime.on_message(&thread, "clean the mart sometime").await.expect("reply");
        let error = runtime.commit(&thread).await.expect_err("should not commit");

        assert_eq!(error, PipelineError::NoPendingCandidate);
        assert!(queue.all().await.expect("all").is_empty());
    }

    #[tokio::test]
    async fn reply_missing_date_line_is_structural_error_and_candidate_survives() {
        let without_date = FULL_REPLY
            .lines()
            .filter(|line| !line.starts_with("Date:"))
            .collect::<Vec<_>>()
            .join("\n");
        let llm = ScriptedLlm::with(vec![Ok(without_date)]);
        let queue = Arc::new(InMemoryQueueStore::default());
        let runtime = runtime(llm, queue.clone());
        let thread = ThreadId::from("T1");

        runtime.on_message(&thread, "clean sunrise mart").await.expect("reply");
        let error = runtime.commit(&thread).await.expect_err("should not commit");

        assert!(matches!(error, PipelineError::StructuralParse(_)));
        assert!(queue.all().await.expect("all").is_empty());
        let session = runtime.sessions().get_or_create(&thread);
        assert!(session.lock().await.candidate().is_some());
    }

    #[tokio::test]
    async fn backend_failure_leaves_thread_unchanged() {
        let llm = ScriptedLlm::with(vec![
            Ok(FULL_REPLY.to_string()),
            Err(anyhow!("connection refused")),
        ]);
        let runtime = runtime(llm, Arc::new(InMemoryQueueStore::default()));
        let thread = ThreadId::from("T1");

        runtime.on_message(&thread, "clean sunrise mart").await.expect("first");
        let error = runtime.on_message(&thread, "make it 3 cleans").await.expect_err("second fails");

        assert!(matches!(error, PipelineError::BackendUnreachable(_)));
        let session = runtime.sessions().get_or_create(&thread);
        let state = session.lock().await;
        assert_eq!(state.history().len(), 2);
        assert_eq!(state.candidate().map(|c| c.reply.as_str()), Some(FULL_REPLY));
    }

    #[tokio::test]
    async fn reset_then_message_leaves_no_residual_candidate() {
        let llm = ScriptedLlm::with(vec![Ok(FULL_REPLY.to_string()), Ok("Missing info".to_string())]);
        let runtime = runtime(llm.clone(), Arc::new(InMemoryQueueStore::default()));
        let thread = ThreadId::from("T1");

        runtime.on_message(&thread, "clean sunrise mart").await.expect("first");
        assert_eq!(runtime.on_new(&thread).await, RESET_ACKNOWLEDGEMENT);
        runtime.on_message(&thread, "new job, no date yet").await.expect("second");

        assert!(llm.requests()[1].history.is_empty());
        let error = runtime.commit(&thread).await.expect_err("nothing to commit");
        assert_eq!(error, PipelineError::NoPendingCandidate);
    }

    #[tokio::test]
    async fn commit_on_one_thread_never_consumes_another_threads_candidate() {
        let llm = ScriptedLlm::with(vec![Ok(FULL_REPLY.to_string())]);
        let queue = Arc::new(InMemoryQueueStore::default());
        let runtime = runtime(llm, queue.clone());

        runtime.on_message(&ThreadId::from("A"), "clean sunrise mart").await.expect("reply");
        let (ok, _) = runtime.on_commit(&ThreadId::from("B")).await;

        assert!(!ok);
        assert!(queue.all().await.expect("all").is_empty());
        let (ok, _) = runtime.on_commit(&ThreadId::from("A")).await;
        assert!(ok);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commits_on_same_thread_append_once() {
        let llm = ScriptedLlm::with(vec![Ok(FULL_REPLY.to_string())]);
        let dir = TempDir::new().expect("tempdir");
        let queue: Arc<dyn QueueStore> = Arc::new(CsvQueueStore::new(dir.path().join("q.csv")));
        let runtime = Arc::new(runtime(llm, queue.clone()));
        let thread = ThreadId::from("T1");
        runtime.on_message(&thread, "clean sunrise mart").await.expect("reply");

        let first = tokio::spawn({
            let runtime = Arc::clone(&runtime);
            let thread = thread.clone();
            async move { runtime.commit(&thread).await }
        });
        let second = tokio::spawn({
            let runtime = Arc::clone(&runtime);
            let thread = thread.clone();
            async move { runtime.commit(&thread).await }
        });
        let results = [first.await.expect("join"), second.await.expect("join")];

        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(results.iter().any(|result| matches!(result, Err(PipelineError::NoPendingCandidate))));
        assert_eq!(queue.all().await.expect("all").len(), 1);
    }

    #[tokio::test]
    async fn unparsed_numeric_value_commits_with_warning() {
        let reply = FULL_REPLY.replace("Floor size: 2400 sqft", "Floor size: about 2400 square feet");
        let llm = ScriptedLlm::with(vec![Ok(reply)]);
        let queue = Arc::new(InMemoryQueueStore::default());
        let runtime = runtime(llm, queue.clone());
        let thread = ThreadId::from("T1");

        runtime.on_message(&thread, "clean sunrise mart").await.expect("reply");
        let (ok, message) = runtime.on_commit(&thread).await;

        assert!(ok);
        assert!(message.contains("Floor size value `about 2400 square feet`"));
        let entries = queue.all().await.expect("all");
        assert_eq!(
            entries[0].record.floor_size_sqft,
            FieldValue::Unparsed("about 2400 square feet".to_string())
        );
    }

    #[tokio::test]
    async fn queue_status_reports_empty_and_populated_queue() {
        let llm = ScriptedLlm::with(vec![Ok(FULL_REPLY.to_string())]);
        let runtime = runtime(llm, Arc::new(InMemoryQueueStore::default()));
        let thread = ThreadId::from("T1");

        assert_eq!(runtime.on_queue_status().await, EMPTY_QUEUE);

        runtime.on_message(&thread, "clean sunrise mart").await.expect("reply");
        runtime.commit(&thread).await.expect("commit");
        let status = runtime.on_queue_status().await;

        assert!(status.starts_with(":warning: Here are the request(s) in the queue:"));
        assert!(status.contains("Date Added | Project"));
    }

    #[tokio::test]
    async fn schema_mismatch_is_reported_and_file_untouched() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("q.csv");
        std::fs::write(&path, "when,what\n").expect("seed");
        let llm = ScriptedLlm::with(vec![Ok(FULL_REPLY.to_string())]);
        let runtime = runtime(llm, Arc::new(CsvQueueStore::new(&path)));
        let thread = ThreadId::from("T1");

        runtime.on_message(&thread, "clean sunrise mart").await.expect("reply");
        let error = runtime.commit(&thread).await.expect_err("schema mismatch");

        assert!(matches!(error, PipelineError::SchemaMismatch { .. }));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "when,what\n");
    }

    #[tokio::test]
    async fn response_log_records_each_exchange() {
        let dir = TempDir::new().expect("tempdir");
        let log_path = dir.path().join("response.log");
        let llm = ScriptedLlm::with(vec![Ok("Missing info".to_string())]);
        let runtime = runtime(llm, Arc::new(InMemoryQueueStore::default()))
            .with_response_log(ResponseLog::new(&log_path));

        runtime.on_message(&ThreadId::from("T1"), "clean the mart").await.expect("reply");

        let raw = std::fs::read_to_string(&log_path).expect("read log");
        assert_eq!(raw, "Input: clean the mart\nResponse: Missing info\n");
    }

    #[test]
    fn mention_lists_commands() {
        let runtime = runtime(ScriptedLlm::with(Vec::new()), Arc::new(InMemoryQueueStore::default()));
        let help = runtime.on_mention();

        for command in ["*/new*", "*/queue*", "*/add-queue*"] {
            assert!(help.contains(command));
        }
        assert!(!runtime.acknowledgement().is_empty());
    }
}
