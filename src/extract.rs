//! Value extraction from NETCONF XML snippets.
//!
//! The aggregator returns each sample as a raw XML string; queries declare
//! how a typed value is pulled out of it. Extraction is intentionally
//! text-based: the XML is never parsed.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

static FIRST_INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// How a value is extracted from each XML snippet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Take the first run of decimal digits in the XML text.
    Int,
    /// Report whether the XML text contains a literal substring.
    Contains,
}

/// Returns the value of the first run of decimal digits in `text`, or `0`
/// if there is none.
///
/// Signs and decimal points are not considered: `"-3.5"` extracts as `3`.
/// A digit run too large for an `i64` also yields `0`.
pub fn first_integer(text: &str) -> i64 {
    FIRST_INTEGER
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// The typed value column of an extracted series.
///
/// A series carries exactly one value type, fixed by the query type, so
/// integer and boolean samples can never mix within one response frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractedValues {
    /// First-integer values, one per sample.
    Int(Vec<i64>),
    /// Substring-containment results, one per sample.
    Contains(Vec<bool>),
}

/// An ordered time series of extracted values, in upstream record order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedSeries {
    /// Sample timestamps, parallel to `values`.
    pub times: Vec<DateTime<Utc>>,
    /// Extracted sample values.
    pub values: ExtractedValues,
}

impl ExtractedSeries {
    /// An empty series whose value column type is fixed by the query type.
    pub fn empty(query_type: QueryType) -> Self {
        let values = match query_type {
            QueryType::Int => ExtractedValues::Int(Vec::new()),
            QueryType::Contains => ExtractedValues::Contains(Vec::new()),
        };
        Self {
            times: Vec::new(),
            values,
        }
    }

    /// The number of samples in the series.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Whether the series holds no samples.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}
