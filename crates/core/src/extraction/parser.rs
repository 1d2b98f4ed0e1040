use crate::domain::record::{
    parse_start_date, FieldValue, JobRecord, RecordField, MISSING_INFO,
};
use crate::errors::{ExtractionError, FieldNormalizationError};
use crate::extraction::protocol::{BULLET_MARKERS, FLOOR_SIZE_UNIT, SCALAR_FIELD_COUNT};

/// A parsed candidate plus any per-field normalization warnings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRecord {
    pub record: JobRecord,
    pub warnings: Vec<FieldNormalizationError>,
}

/// Parses an untrusted backend reply into a [`JobRecord`].
///
/// The reply is validated before anything is mapped: the seven scalar
/// categories must each be present, labeled, and in protocol order. Mapping
/// is positional once that holds. Lines are split on the first colon only so
/// values such as `555-0100 ext: 2` survive intact.
pub fn parse_reply(reply: &str) -> Result<ParsedRecord, ExtractionError> {
    let lines = reply.lines().filter(|line| !line.trim().is_empty()).collect::<Vec<_>>();
    let lines = skip_preamble(&lines);

    let mut scalars = Vec::with_capacity(SCALAR_FIELD_COUNT);
    for (position, field) in RecordField::ALL.iter().take(SCALAR_FIELD_COUNT).enumerate() {
        let Some((label, value)) = lines.get(position).and_then(|line| split_label(line)) else {
            return Err(ExtractionError::TooFewLabeledLines {
                found: position,
                required: SCALAR_FIELD_COUNT,
            });
        };

        if !label_matches(label, field.label()) {
            return Err(ExtractionError::UnexpectedLabel {
                position: position + 1,
                expected: field.label(),
                found: label.trim().to_owned(),
            });
        }

        scalars.push(null_marker(clean_value(value)));
    }

    let mut warnings = Vec::new();
    let record = JobRecord {
        retail_name: scalars[0].map(str::to_owned),
        floor_size_sqft: normalize(
            scalars[1],
            RecordField::FloorSize,
            "a whole number of sqft",
            parse_floor_size,
            &mut warnings,
        ),
        supervisor_name: scalars[2].map(str::to_owned),
        supervisor_contact: scalars[3].map(str::to_owned),
        start_date: normalize(
            scalars[4],
            RecordField::StartDate,
            "a calendar date",
            parse_start_date,
            &mut warnings,
        ),
        cleans_count: normalize(
            scalars[5],
            RecordField::Cleans,
            "a whole number",
            parse_count,
            &mut warnings,
        ),
        touchups_count: normalize(
            scalars[6],
            RecordField::TouchUps,
            "a whole number",
            parse_count,
            &mut warnings,
        ),
        requirements: parse_requirements(&lines[SCALAR_FIELD_COUNT..]),
    };

    Ok(ParsedRecord { record, warnings })
}

/// Splits a line once, on its first colon.
pub fn split_label(line: &str) -> Option<(&str, &str)> {
    line.split_once(':')
}

fn skip_preamble<'a>(lines: &'a [&'a str]) -> &'a [&'a str] {
    let first_label = RecordField::RetailName.label();
    let start = lines
        .iter()
        .position(|line| split_label(line).is_some_and(|(label, _)| label_matches(label, first_label)))
        .unwrap_or(0);
    &lines[start..]
}

/// Compares labels on their letters only, so list numbering, markdown emphasis,
/// and hyphenation differences do not matter.
fn label_matches(found: &str, expected: &str) -> bool {
    let normalize = |value: &str| {
        value
            .chars()
            .filter(char::is_ascii_alphabetic)
            .map(|ch| ch.to_ascii_lowercase())
            .collect::<String>()
    };
    normalize(found) == normalize(expected)
}

/// Drops the closing half of `**label:**` emphasis along with whitespace.
fn clean_value(value: &str) -> &str {
    value.trim().trim_start_matches('*').trim()
}

fn null_marker(value: &str) -> Option<&str> {
    if value.is_empty() || value == MISSING_INFO || value.contains("None") {
        None
    } else {
        Some(value)
    }
}

fn normalize<T, F>(
    value: Option<&str>,
    field: RecordField,
    expected: &'static str,
    parse: F,
    warnings: &mut Vec<FieldNormalizationError>,
) -> FieldValue<T>
where
    F: FnOnce(&str) -> Option<T>,
{
    let Some(raw) = value else {
        return FieldValue::Missing;
    };

    match parse(raw) {
        Some(parsed) => FieldValue::Present(parsed),
        None => {
            warnings.push(FieldNormalizationError { field, raw: raw.to_owned(), expected });
            FieldValue::Unparsed(raw.to_owned())
        }
    }
}

fn parse_floor_size(raw: &str) -> Option<u64> {
    if !raw.to_ascii_lowercase().contains(FLOOR_SIZE_UNIT) {
        return None;
    }
    let token = raw.split_whitespace().next()?.to_ascii_lowercase();
    let digits = token.strip_suffix(FLOOR_SIZE_UNIT).unwrap_or(&token);
    parse_whole_number(digits)
}

fn parse_count(raw: &str) -> Option<u32> {
    let token = raw.split_whitespace().next()?;
    parse_whole_number(token).and_then(|value| u32::try_from(value).ok())
}

fn parse_whole_number(token: &str) -> Option<u64> {
    let digits = token.replace(',', "");
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()
}

fn parse_requirements(lines: &[&str]) -> Vec<String> {
    let requirements_label = RecordField::Requirements.label();
    let (inline, bullets) = match lines.split_first() {
        Some((first, rest)) => match split_label(first) {
            Some((label, value)) if label_matches(label, requirements_label) => (Some(value), rest),
            _ => (None, lines),
        },
        None => (None, lines),
    };

    let mut requirements = inline
        .map(|value| {
            clean_value(value)
                .split(',')
                .filter_map(|entry| null_marker(entry.trim()))
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    requirements.extend(
        bullets.iter().filter_map(|line| null_marker(strip_bullet(line))).map(str::to_owned),
    );
    requirements
}

fn strip_bullet(line: &str) -> &str {
    let trimmed = line.trim();
    trimmed.strip_prefix(BULLET_MARKERS).map(str::trim_start).unwrap_or(trimmed)
}
