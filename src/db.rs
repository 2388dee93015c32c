mod schema;

pub use schema::Database;

use crate::formats::BookFormat;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// A book registered in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Unique book ID (UUID v4).
    pub id: String,
    /// Book title.
    pub title: String,
    /// Primary author, empty when unknown.
    pub author: String,
    /// Absolute path of the extracted or uploaded cover.
    pub cover_path: Option<String>,
    /// Absolute path of the book file.
    pub file_path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Book format.
    pub file_type: BookFormat,
    /// When the book was added.
    pub added_at: DateTime<Utc>,
    /// Opaque reading position saved by the client (CFI or page).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_progress: Option<String>,
}

/// Highlight with an optional note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// Annotation ID.
    pub id: String,
    /// Book ID.
    pub book_id: String,
    /// EPUB CFI range of the highlight.
    pub cfi: String,
    /// Highlighted text.
    pub text: String,
    /// User note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Highlight color.
    pub color: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Default highlight color.
pub const DEFAULT_COLOR: &str = "yellow";

impl ToSql for BookFormat {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BookFormat {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let name = value.as_str()?;
        BookFormat::from_extension(name)
            .ok_or_else(|| FromSqlError::Other(format!("unknown file type: {}", name).into()))
    }
}

/// Current time, truncated to the millisecond precision stored in the database.
pub fn now() -> DateTime<Utc> {
    timestamp_to_datetime(Utc::now().timestamp_millis())
}

/// Convert a millisecond timestamp to DateTime.
pub fn timestamp_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// Read a timestamp column: milliseconds, or text written by older versions.
fn timestamp_column(value: ValueRef<'_>) -> FromSqlResult<DateTime<Utc>> {
    match value {
        ValueRef::Integer(ms) => Ok(timestamp_to_datetime(ms)),
        ValueRef::Text(_) => {
            let text = value.as_str()?;
            DateTime::parse_from_rfc3339(text)
                .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z"))
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").map(|dt| dt.and_utc())
                })
                .map_err(|e| FromSqlError::Other(Box::new(e)))
        }
        ValueRef::Null => Ok(timestamp_to_datetime(0)),
        _ => Err(FromSqlError::InvalidType),
    }
}
