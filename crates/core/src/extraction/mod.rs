//! Extraction protocol and the parser for backend replies.
//!
//! The backend is instructed (`protocol`) to answer with eight labeled
//! categories; `parser` turns such a reply into a [`JobRecord`] after checking
//! that the reply really has that shape.
//!
//! [`JobRecord`]: crate::domain::record::JobRecord

pub mod parser;
pub mod protocol;

pub use parser::{parse_reply, ParsedRecord};
pub use protocol::{is_incomplete_date_signal, ExtractionProtocol};
