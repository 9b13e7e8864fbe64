//! Minimal CSV encoding for ledger rows.
//!
//! Fields are quoted only when they contain a delimiter, a quote or a line
//! break; inner quotes are doubled. The reader accepts the same dialect and
//! reports whether each record was newline-terminated so a torn final row can
//! be told apart from a complete one.

use super::LedgerEntry;

/// One parsed CSV record.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Record {
    pub(super) fields: Vec<String>,
    pub(super) terminated: bool,
}

/// Render an entry as a single newline-terminated row.
pub(super) fn format_row(entry: &LedgerEntry) -> String {
    format!(
        "{},{},{}\n",
        quote_field(&entry.identifier),
        entry.score,
        entry.duration_seconds
    )
}

/// Convert a record into an entry when it has exactly three well-formed fields.
pub(super) fn record_to_entry(record: &Record) -> Option<LedgerEntry> {
    let [identifier, score, duration] = record.fields.as_slice() else {
        return None;
    };
    if identifier.is_empty() {
        return None;
    }
    let score = score.trim().parse::<f64>().ok()?;
    let duration_seconds = duration.trim().parse::<f64>().ok()?;
    Some(LedgerEntry {
        identifier: identifier.clone(),
        score,
        duration_seconds,
    })
}

fn quote_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Byte length of the prefix that ends with the last complete record.
///
/// A line break only ends a record outside quotes, so a row torn inside a
/// quoted identifier is measured as part of the tail, not the prefix.
pub(super) fn complete_prefix_len(bytes: &[u8]) -> usize {
    let mut in_quotes = false;
    let mut end = 0;
    for (index, byte) in bytes.iter().enumerate() {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => end = index + 1,
            _ => {}
        }
    }
    end
}

/// Split `text` into records. Blank lines are skipped.
pub(super) fn parse_records(text: &str) -> Vec<Record> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut row_started = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
            continue;
        }
        match ch {
            '"' => {
                in_quotes = true;
                row_started = true;
            }
            ',' => {
                fields.push(std::mem::take(&mut field));
                row_started = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                if row_started || !field.is_empty() {
                    fields.push(std::mem::take(&mut field));
                    records.push(Record {
                        fields: std::mem::take(&mut fields),
                        terminated: true,
                    });
                }
                row_started = false;
            }
            other => {
                field.push(other);
                row_started = true;
            }
        }
    }

    if row_started || !field.is_empty() {
        fields.push(field);
        records.push(Record {
            fields,
            terminated: false,
        });
    }
    records
}
