//! Book metadata model
//!
//! Field layout mirrors what the Calibre plugin sends to the library service.
//! Repeatable fields are order-significant: both the metadata digest and the
//! finalize form preserve their order.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format used for `issued_on` on the wire and in the digest
pub const ISSUED_ON_FORMAT: &str = "%Y-%m-%d";

/// Metadata parsing errors
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Invalid issued-on date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Series title cannot be empty")]
    EmptySeriesTitle,
}

/// One series membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub title: String,
    /// Position in the series, kept as text (e.g. "1", "2.5")
    #[serde(default)]
    pub index: Option<String>,
}

impl SeriesEntry {
    pub fn new(title: impl Into<String>, index: Option<&str>) -> Self {
        Self {
            title: title.into(),
            index: index.map(str::to_string),
        }
    }

    /// Parse a `TITLE[:INDEX]` argument.
    ///
    /// The split happens on the first `:`. Numeric indexes are normalized
    /// the way the plugin renders them: integers lose leading zeros and
    /// decimals keep at least one fractional digit ("2" -> "2", "02" -> "2",
    /// "1.50" -> "1.5", "3.0" -> "3.0"). Anything else is kept verbatim.
    pub fn parse(arg: &str) -> Result<Self, MetadataError> {
        let (title, index) = match arg.split_once(':') {
            Some((title, index)) => (title, Some(normalize_index(index))),
            None => (arg, None),
        };

        if title.is_empty() {
            return Err(MetadataError::EmptySeriesTitle);
        }

        Ok(Self {
            title: title.to_string(),
            index,
        })
    }
}

fn normalize_index(raw: &str) -> String {
    if raw.contains('.') {
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => {
                if v.fract() == 0.0 {
                    format!("{:.1}", v)
                } else {
                    format!("{}", v)
                }
            }
            _ => raw.to_string(),
        }
    } else {
        match raw.parse::<i64>() {
            Ok(v) => v.to_string(),
            Err(_) => raw.to_string(),
        }
    }
}

/// Book metadata submitted with an upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub issued_on: Option<NaiveDate>,
    #[serde(default)]
    pub series: Vec<SeriesEntry>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// `None` omits the field entirely; `Some(vec![])` is a present but
    /// empty shelf list, which the service and the digest treat differently.
    #[serde(default)]
    pub bookshelves: Option<Vec<String>>,
}

impl BookMetadata {
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    /// `issued_on` rendered as `YYYY-MM-DD`
    pub fn issued_on_text(&self) -> Option<String> {
        self.issued_on
            .map(|d| d.format(ISSUED_ON_FORMAT).to_string())
    }
}

/// Parse a `YYYY-MM-DD` publication date
pub fn parse_issued_on(raw: &str) -> Result<NaiveDate, MetadataError> {
    NaiveDate::parse_from_str(raw.trim(), ISSUED_ON_FORMAT)
        .map_err(|_| MetadataError::InvalidDate(raw.to_string()))
}

/// Split repeated `--tag` values on commas, trimming each piece
pub fn split_tags<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .flat_map(|v| {
            v.as_ref()
                .split(',')
                .map(|t| t.trim().to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}
