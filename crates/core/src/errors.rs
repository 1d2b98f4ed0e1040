use thiserror::Error;

use crate::domain::record::RecordField;

/// The backend reply does not have the shape of an extraction block.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("reply has {found} labeled lines where at least {required} are required")]
    TooFewLabeledLines { found: usize, required: usize },
    #[error("line {position} is labeled `{found}` but `{expected}` was expected")]
    UnexpectedLabel { position: usize, expected: &'static str, found: String },
}

/// A value that should have been numeric or a date but was not. The record
/// still commits with the raw text preserved.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{field} value `{raw}` is not {expected}")]
pub struct FieldNormalizationError {
    pub field: RecordField,
    pub raw: String,
    pub expected: &'static str,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("generative backend unreachable: {0}")]
    BackendUnreachable(String),
    #[error(transparent)]
    StructuralParse(#[from] ExtractionError),
    #[error("queue schema mismatch: expected `{expected}`, found `{found}`")]
    SchemaMismatch { expected: String, found: String },
    #[error("no pending extraction for this conversation")]
    NoPendingCandidate,
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl PipelineError {
    /// `NoPendingCandidate` is a normal outcome, not a failure needing recovery.
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::NoPendingCandidate)
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::BackendUnreachable(_) => {
                ":x: I could not reach the extraction service. Please send the request again shortly."
                    .to_owned()
            }
            Self::StructuralParse(error) => format!(
                ":x: The last extraction is incomplete ({error}). Refine the request and try again."
            ),
            Self::SchemaMismatch { .. } => {
                ":x: The queue file has unexpected columns. Ask an operator to fix it before adding requests."
                    .to_owned()
            }
            Self::NoPendingCandidate => "No response from the LLM yet.".to_owned(),
            Self::Persistence(_) => {
                ":x: The request could not be saved to the queue. The existing queue is unchanged."
                    .to_owned()
            }
        }
    }
}
