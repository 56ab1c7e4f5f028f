//! Filter clauses for listing and exporting extractions.
//!
//! Request parameters are turned into a list of typed [`FilterClause`]s which
//! are pushed into a [`QueryBuilder`] as bound values and joined with `AND`.

use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};

/// Timestamp layout used by SQLite's `CURRENT_TIMESTAMP`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Serde adapter writing timestamps in [`TIMESTAMP_FORMAT`]
pub mod sqlite_timestamp {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT).map_err(de::Error::custom)
    }
}

/// Relative time window on `extraction_date`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
    /// Same calendar date as now
    Today,
    /// Last 7 days
    Week,
    /// Last 30 days
    Month,
}

impl DateFilter {
    /// Parse a `date_filter` parameter. Unknown values mean "no constraint".
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "today" => Some(DateFilter::Today),
            "week" => Some(DateFilter::Week),
            "month" => Some(DateFilter::Month),
            _ => None,
        }
    }

    /// Clause for this window relative to `now`
    pub fn clause(self, now: NaiveDateTime) -> FilterClause {
        match self {
            DateFilter::Today => FilterClause::OnDate(now.date()),
            DateFilter::Week => FilterClause::Since(now - Duration::days(7)),
            DateFilter::Month => FilterClause::Since(now - Duration::days(30)),
        }
    }
}

/// One conjunctive predicate over the `extractions` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterClause {
    /// `filename` contains the substring
    FilenameContains(String),
    /// `extraction_date` falls on the date
    OnDate(NaiveDate),
    /// `extraction_date` is at or after the instant
    Since(NaiveDateTime),
}

impl FilterClause {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            FilterClause::FilenameContains(term) => {
                builder
                    .push("filename LIKE ")
                    .push_bind(format!("%{}%", escape_like(term)))
                    .push(" ESCAPE '\\'");
            }
            FilterClause::OnDate(date) => {
                builder
                    .push("DATE(extraction_date) = ")
                    .push_bind(date.format("%Y-%m-%d").to_string());
            }
            FilterClause::Since(instant) => {
                builder
                    .push("extraction_date >= ")
                    .push_bind(instant.format(TIMESTAMP_FORMAT).to_string());
            }
        }
    }
}

/// Query string accepted by the list and export endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub date_filter: Option<String>,
}

impl ExtractionQuery {
    /// Clauses for this query evaluated at `now` (UTC)
    pub fn clauses_at(&self, now: NaiveDateTime) -> Vec<FilterClause> {
        let mut clauses = Vec::new();

        if let Some(term) = self.search.as_deref().filter(|s| !s.is_empty()) {
            clauses.push(FilterClause::FilenameContains(term.to_string()));
        }

        if let Some(filter) = self.date_filter.as_deref().and_then(DateFilter::parse) {
            clauses.push(filter.clause(now));
        }

        clauses
    }

    pub fn clauses(&self) -> Vec<FilterClause> {
        self.clauses_at(Utc::now().naive_utc())
    }
}

/// Append `WHERE a AND b ...` for the clauses; nothing when empty.
pub fn push_where(builder: &mut QueryBuilder<'_, Sqlite>, clauses: &[FilterClause]) {
    for (i, clause) in clauses.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        clause.push_to(builder);
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
