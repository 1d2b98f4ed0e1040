use chrono::NaiveDate;

use crate::domain::record::{RecordField, MISSING_INFO};

/// Number of single-valued categories preceding the requirements list.
pub const SCALAR_FIELD_COUNT: usize = 7;

/// Unit token the backend appends to normalized floor areas.
pub const FLOOR_SIZE_UNIT: &str = "sqft";

/// Marker prefixes accepted in front of bulleted requirement lines.
pub const BULLET_MARKERS: [char; 3] = ['•', '*', '-'];

/// Fixed category contract handed to the generative backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionProtocol {
    today: NaiveDate,
}

impl ExtractionProtocol {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn labels() -> [&'static str; 8] {
        RecordField::ALL.map(|field| field.label())
    }

    pub fn instructions(&self) -> String {
        let categories = Self::labels()
            .iter()
            .enumerate()
            .map(|(index, label)| format!("{}. {label}:", index + 1))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You assist a project management company that provides janitorial cleaning \
services to retail properties. Sales staff send you messages describing new cleaning requests. \
Extract the request details and reply with exactly these categories, one per line, in this \
order, formatted as `<category>: <value>`:\n\
{categories}\n\n\
Reply with the categories only. Do not add a preface or any commentary.\n\n\
Rules:\n\
- Today's date is {today}. Resolve relative dates from it and write dates as YYYY-MM-DD.\n\
- Correct obvious typos in the message before extracting.\n\
- Write the floor size as a whole number followed by a space and `{unit}`, for example \
`1234 {unit}`. Expand K suffixes (2K becomes 2000) and remove thousands separators.\n\
- If the message gives the overall floor size but only a sub-section needs cleaning, report the \
sub-section size.\n\
- Write cleans and touch-ups as whole numbers.\n\
- When there is more than one cleaning requirement, list each one on its own bullet line below \
the last category.\n\
- If any category cannot be found in the message, write `{missing}` as its value and ask the \
sales person for it.\n\
- If the start date is incomplete, missing, or cannot be interpreted, reply with `{missing}` \
and nothing else.\n\
- If the message is not related to cleaning a retail property, do not list the categories; ask \
the sales person to send a message about a retail property clean instead.",
            today = self.today.format("%Y-%m-%d"),
            unit = FLOOR_SIZE_UNIT,
            missing = MISSING_INFO,
        )
    }
}

/// The backend answers with the bare null-marker when the start date cannot
/// be resolved; such a reply never becomes a commit candidate.
pub fn is_incomplete_date_signal(reply: &str) -> bool {
    reply.trim() == MISSING_INFO
}
