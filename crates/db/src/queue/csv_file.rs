use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use cleanq_core::domain::record::{FieldValue, JobRecord, QueueEntry, MISSING_INFO};

use super::{QueueStore, QueueStoreError, QUEUE_COLUMNS, REQUIREMENT_SEPARATOR};

const STORED_DATE_FORMAT: &str = "%Y-%m-%d";

/// Queue persisted as a comma-separated file.
///
/// Every append rewrites the whole file through a sibling temp file that is
/// synced and then renamed over the original, so readers see either the old
/// queue or the new one. Appends in this process serialize on `write_lock`;
/// nothing coordinates with other processes writing the same path.
pub struct CsvQueueStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvQueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Validates the header of an existing file without decoding its rows.
    /// A missing or blank file passes.
    pub async fn check_schema(&self) -> Result<(), QueueStoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(self.io_error(error)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes.as_slice());
        check_header(reader.headers()?)
    }

    fn io_error(&self, source: std::io::Error) -> QueueStoreError {
        QueueStoreError::Io { path: self.path.clone(), source }
    }

    async fn read_entries(&self) -> Result<Vec<QueueEntry>, QueueStoreError> {
        match fs::read(&self.path).await {
            Ok(bytes) => decode(&bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(error) => Err(self.io_error(error)),
        }
    }

    async fn persist(&self, entries: &[QueueEntry]) -> Result<(), QueueStoreError> {
        let bytes = encode(entries)?;

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|error| self.io_error(error))?;
        }

        let temp_path = self.temp_path();
        let write_result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(error) = write_result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(self.io_error(error));
        }

        debug!(path = %self.path.display(), rows = entries.len(), "queue file rewritten");
        Ok(())
    }
}

#[async_trait]
impl QueueStore for CsvQueueStore {
    async fn ensure_initialized(&self) -> Result<(), QueueStoreError> {
        let _guard = self.write_lock.lock().await;

        match fs::metadata(&self.path).await {
            Ok(metadata) if metadata.len() > 0 => return Ok(()),
            Ok(_) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => return Err(self.io_error(error)),
        }

        self.persist(&[]).await?;
        info!(
            event_name = "queue.initialized",
            path = %self.path.display(),
            "created queue file with header"
        );
        Ok(())
    }

    async fn append(&self, entry: QueueEntry) -> Result<(), QueueStoreError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.read_entries().await?;
        entries.push(entry);
        entries.sort_by_key(|entry| entry.date_added);
        self.persist(&entries).await?;

        info!(
            event_name = "queue.appended",
            path = %self.path.display(),
            queue_len = entries.len(),
            "queue entry appended"
        );
        Ok(())
    }

    async fn all(&self) -> Result<Vec<QueueEntry>, QueueStoreError> {
        self.read_entries().await
    }

    async fn exists(&self) -> Result<bool, QueueStoreError> {
        fs::try_exists(&self.path).await.map_err(|error| self.io_error(error))
    }
}

fn decode(bytes: &[u8]) -> Result<Vec<QueueEntry>, QueueStoreError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    check_header(reader.headers()?)?;

    reader
        .records()
        .enumerate()
        .map(|(index, row)| decode_row(index + 1, &row?))
        .collect()
}

fn check_header(headers: &csv::StringRecord) -> Result<(), QueueStoreError> {
    let found = headers.iter().map(str::trim).collect::<Vec<_>>();
    if found == QUEUE_COLUMNS {
        return Ok(());
    }

    Err(QueueStoreError::SchemaMismatch {
        expected: QUEUE_COLUMNS.join(","),
        found: found.join(","),
    })
}

fn decode_row(row: usize, record: &csv::StringRecord) -> Result<QueueEntry, QueueStoreError> {
    let cell = |index: usize| record.get(index).map(str::trim).unwrap_or_default();

    let date_added = NaiveDate::parse_from_str(cell(0), STORED_DATE_FORMAT).map_err(|_| {
        QueueStoreError::Decode {
            row,
            message: format!("`{}` is not a {STORED_DATE_FORMAT} date", cell(0)),
        }
    })?;

    let record = JobRecord {
        retail_name: decode_text(cell(1)),
        floor_size_sqft: decode_value(cell(2), |raw| u64::from_str(raw).ok()),
        supervisor_name: decode_text(cell(3)),
        supervisor_contact: decode_text(cell(4)),
        start_date: decode_value(cell(5), |raw| {
            NaiveDate::parse_from_str(raw, STORED_DATE_FORMAT).ok()
        }),
        cleans_count: decode_value(cell(6), |raw| u32::from_str(raw).ok()),
        touchups_count: decode_value(cell(7), |raw| u32::from_str(raw).ok()),
        requirements: decode_requirements(cell(8)),
    };

    Ok(QueueEntry::new(date_added, record))
}

fn is_null_cell(raw: &str) -> bool {
    raw.is_empty() || raw == MISSING_INFO
}

fn decode_text(raw: &str) -> Option<String> {
    (!is_null_cell(raw)).then(|| raw.to_owned())
}

/// Cells are decoded against the column's own format, not the chat reply
/// grammar. An `Unparsed` value whose raw text is already a well-formed cell
/// (a bare `2400` in the sqft column) reloads as `Present`; anything else
/// stays `Unparsed` with its raw text.
fn decode_value<T, F>(raw: &str, parse: F) -> FieldValue<T>
where
    F: FnOnce(&str) -> Option<T>,
{
    if is_null_cell(raw) {
        return FieldValue::Missing;
    }
    parse(raw).map_or_else(|| FieldValue::Unparsed(raw.to_owned()), FieldValue::Present)
}

fn decode_requirements(raw: &str) -> Vec<String> {
    raw.split(REQUIREMENT_SEPARATOR)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn encode(entries: &[QueueEntry]) -> Result<Vec<u8>, QueueStoreError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(QUEUE_COLUMNS)?;

    for entry in entries {
        let record = &entry.record;
        writer.write_record([
            entry.date_added.format(STORED_DATE_FORMAT).to_string(),
            record.project_name().to_owned(),
            record.floor_size_sqft.to_string(),
            encode_text(record.supervisor_name.as_deref()),
            encode_text(record.supervisor_contact.as_deref()),
            record
                .start_date
                .render_with(|date| date.format(STORED_DATE_FORMAT).to_string()),
            record.cleans_count.to_string(),
            record.touchups_count.to_string(),
            encode_requirements(&record.requirements),
        ])?;
    }

    writer.into_inner().map_err(|error| QueueStoreError::Encode(error.to_string()))
}

fn encode_text(value: Option<&str>) -> String {
    value.unwrap_or(MISSING_INFO).to_owned()
}

fn encode_requirements(requirements: &[String]) -> String {
    let separator = REQUIREMENT_SEPARATOR.to_string();
    requirements
        .iter()
        .map(|item| item.replace(REQUIREMENT_SEPARATOR, "/"))
        .collect::<Vec<_>>()
        .join(&format!(" {separator} "))
}
