pub mod config;
pub mod domain;
pub mod errors;
pub mod extraction;
pub mod presenter;

pub use domain::dialogue::{DialogueRole, DialogueTurn};
pub use domain::record::{FieldValue, JobRecord, QueueEntry, RecordField, MISSING_INFO};
pub use errors::{ExtractionError, FieldNormalizationError, PipelineError};
pub use extraction::{is_incomplete_date_signal, parse_reply, ExtractionProtocol, ParsedRecord};
