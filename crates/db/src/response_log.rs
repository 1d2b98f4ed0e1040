use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only audit trail of request text and the backend's extraction.
/// Nothing in the pipeline reads it back.
pub struct ResponseLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ResponseLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, input: &str, response: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(format!("Input: {input}\nResponse: {response}\n").as_bytes()).await?;
        file.flush().await
    }
}
