//! Metadata filters for similarity search.
//!
//! A [`MetadataFilter`] is a conjunction of [`Predicate`]s over document
//! [`Field`]s. The index evaluates the filter before scoring, so excluded
//! chunks never appear in results.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::DocumentMetadata;
use crate::error::{RagError, Result};

/// Document attributes a predicate can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    FileType,
    Language,
    Source,
    /// Matches when the document's topic list contains the value.
    Topic,
    IngestedAt,
}

impl Field {
    fn is_temporal(self) -> bool {
        matches!(self, Self::IngestedAt)
    }
}

/// A single test against one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Eq { field: Field, value: String },
    In { field: Field, values: Vec<String> },
    /// `from` is inclusive, `to` exclusive; a missing bound is open.
    Range { field: Field, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>> },
}

impl Predicate {
    /// `field` equals `value`.
    pub fn eq(field: Field, value: impl AsRef<str>) -> Self {
        Self::Eq { field, value: normalize_value(field, value.as_ref()) }
    }

    /// `field` equals one of `values`.
    pub fn any_of<I, S>(field: Field, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::In {
            field,
            values: values.into_iter().map(|v| normalize_value(field, v.as_ref())).collect(),
        }
    }

    /// Documents ingested on or after `from` and on or before `to` (whole days, UTC).
    pub fn ingested_between(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        let from = from.map(|d| d.and_time(NaiveTime::MIN).and_utc());
        let to = to
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .map(|d| d.and_time(NaiveTime::MIN).and_utc());
        Self::Range { field: Field::IngestedAt, from, to }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Eq { field, .. } | Self::In { field, .. } if field.is_temporal() => {
                Err(RagError::InvalidQuery(format!("{field:?} only supports range predicates")))
            }
            Self::Range { field, .. } if !field.is_temporal() => {
                Err(RagError::InvalidQuery(format!("{field:?} does not support range predicates")))
            }
            Self::Range { from: Some(from), to: Some(to), .. } if from > to => {
                Err(RagError::InvalidQuery("date range starts after it ends".into()))
            }
            _ => Ok(()),
        }
    }

    fn matches(&self, metadata: &DocumentMetadata) -> bool {
        match self {
            Self::Eq { field, value } => text_matches(metadata, *field, |v| v == value),
            Self::In { field, values } => {
                text_matches(metadata, *field, |v| values.iter().any(|candidate| candidate == v))
            }
            Self::Range { field: Field::IngestedAt, from, to } => {
                let at = metadata.ingested_at;
                from.is_none_or(|from| at >= from) && to.is_none_or(|to| at < to)
            }
            Self::Range { .. } => false,
        }
    }
}

/// Conjunction of predicates; the empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter {
    predicates: Vec<Predicate>,
}

impl MetadataFilter {
    /// A filter that matches every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate that must also hold.
    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Whether no predicate has been added.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// The predicates, in the order they were added.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Reject predicates that can never be evaluated meaningfully.
    pub fn validate(&self) -> Result<()> {
        self.predicates.iter().try_for_each(Predicate::validate)
    }

    /// Whether every predicate holds for `metadata`.
    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        self.predicates.iter().all(|p| p.matches(metadata))
    }
}

fn text_matches(metadata: &DocumentMetadata, field: Field, test: impl Fn(&str) -> bool) -> bool {
    match field {
        Field::FileType => test(&metadata.file_type),
        Field::Language => test(&metadata.language),
        Field::Source => test(&metadata.source),
        Field::Topic => metadata.topics.iter().any(|topic| test(topic)),
        Field::IngestedAt => false,
    }
}

/// File types compare as lower-case dotted extensions, languages and topics
/// case-insensitively, sources exactly.
fn normalize_value(field: Field, value: &str) -> String {
    let value = value.trim();
    match field {
        Field::FileType => {
            let lower = value.to_ascii_lowercase();
            if lower.starts_with('.') { lower } else { format!(".{lower}") }
        }
        Field::Language | Field::Topic => value.to_lowercase(),
        Field::Source | Field::IngestedAt => value.to_string(),
    }
}
