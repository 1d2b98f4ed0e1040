use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Sentinel the extraction protocol uses for a field absent from the source text.
pub const MISSING_INFO: &str = "Missing info";

const START_DATE_FORMATS: [&str; 9] = [
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%A, %B %d, %Y",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordField {
    RetailName,
    FloorSize,
    Supervisor,
    SupervisorContact,
    StartDate,
    Cleans,
    TouchUps,
    Requirements,
}

impl RecordField {
    pub const ALL: [RecordField; 8] = [
        Self::RetailName,
        Self::FloorSize,
        Self::Supervisor,
        Self::SupervisorContact,
        Self::StartDate,
        Self::Cleans,
        Self::TouchUps,
        Self::Requirements,
    ];

    /// Category label the backend is instructed to emit for this field.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RetailName => "Retail name",
            Self::FloorSize => "Floor size",
            Self::Supervisor => "Supervisor",
            Self::SupervisorContact => "Supervisor contact",
            Self::StartDate => "Date",
            Self::Cleans => "Cleans",
            Self::TouchUps => "Touch-ups",
            Self::Requirements => "Cleaning requirements",
        }
    }

    /// Column name in the persisted queue file.
    pub fn column(&self) -> &'static str {
        match self {
            Self::RetailName => "project_name",
            Self::FloorSize => "sqft",
            Self::Supervisor => "supervisor",
            Self::SupervisorContact => "supervisor_contact",
            Self::StartDate => "project_start",
            Self::Cleans => "cleans",
            Self::TouchUps => "touchups",
            Self::Requirements => "project_requirements",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A typed field that may be absent or may have failed normalization.
///
/// `Unparsed` keeps the backend's raw text so a record with one malformed
/// numeric value can still be committed without losing information.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue<T> {
    Present(T),
    Missing,
    Unparsed(String),
}

impl<T> FieldValue<T> {
    pub fn present(&self) -> Option<&T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Missing | Self::Unparsed(_) => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn render_with<F>(&self, render: F) -> String
    where
        F: FnOnce(&T) -> String,
    {
        match self {
            Self::Present(value) => render(value),
            Self::Missing => MISSING_INFO.to_owned(),
            Self::Unparsed(raw) => raw.clone(),
        }
    }
}

impl<T: fmt::Display> fmt::Display for FieldValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present(value) => write!(f, "{value}"),
            Self::Missing => f.write_str(MISSING_INFO),
            Self::Unparsed(raw) => f.write_str(raw),
        }
    }
}

/// One extracted cleaning request. Text fields use `None` as the null-marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub retail_name: Option<String>,
    pub floor_size_sqft: FieldValue<u64>,
    pub supervisor_name: Option<String>,
    pub supervisor_contact: Option<String>,
    pub start_date: FieldValue<NaiveDate>,
    pub cleans_count: FieldValue<u32>,
    pub touchups_count: FieldValue<u32>,
    pub requirements: Vec<String>,
}

impl JobRecord {
    pub fn project_name(&self) -> &str {
        self.retail_name.as_deref().unwrap_or(MISSING_INFO)
    }

    pub fn missing_fields(&self) -> Vec<RecordField> {
        let mut missing = Vec::new();
        if self.retail_name.is_none() {
            missing.push(RecordField::RetailName);
        }
        if self.floor_size_sqft.is_missing() {
            missing.push(RecordField::FloorSize);
        }
        if self.supervisor_name.is_none() {
            missing.push(RecordField::Supervisor);
        }
        if self.supervisor_contact.is_none() {
            missing.push(RecordField::SupervisorContact);
        }
        if self.start_date.is_missing() {
            missing.push(RecordField::StartDate);
        }
        if self.cleans_count.is_missing() {
            missing.push(RecordField::Cleans);
        }
        if self.touchups_count.is_missing() {
            missing.push(RecordField::TouchUps);
        }
        missing
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub date_added: NaiveDate,
    pub record: JobRecord,
}

impl QueueEntry {
    pub fn new(date_added: NaiveDate, record: JobRecord) -> Self {
        Self { date_added, record }
    }
}

/// Parses the date shapes the backend tends to emit. Ordinal suffixes
/// (`15th`) are accepted.
pub fn parse_start_date(raw: &str) -> Option<NaiveDate> {
    let normalized = strip_ordinal_suffixes(raw.trim());
    START_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&normalized, format).ok())
}

pub fn format_display_date(date: &NaiveDate) -> String {
    date.format("%m/%d/%Y").to_string()
}

fn strip_ordinal_suffixes(raw: &str) -> String {
    let mut output = String::with_capacity(raw.len());
    let chars = raw.chars().collect::<Vec<_>>();
    let mut index = 0usize;

    while index < chars.len() {
        let current = chars[index];
        output.push(current);
        index += 1;

        if current.is_ascii_digit() {
            let suffix = chars.iter().skip(index).take(2).collect::<String>().to_ascii_lowercase();
            let at_boundary = chars.get(index + 2).map_or(true, |next| !next.is_ascii_alphabetic());
            if matches!(suffix.as_str(), "st" | "nd" | "rd" | "th") && at_boundary {
                index += 2;
            }
        }
    }

    output
}
