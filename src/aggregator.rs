//! HTTP client for the netconf aggregator service.
//!
//! The aggregator exposes two endpoints used here:
//!
//! - `GET {address}/devices` — the device inventory, forwarded verbatim to
//!   the frontend by the plugin's resource endpoint.
//! - `POST {address}/timeseries/{device}` with body `{"xpathQuery": ...}` —
//!   an array of `{timestamp, xml}` samples for one device.
//!
//! Every call binds a 10-second timeout and is attempt-once; there are no
//! retries. Address and query preconditions are checked before any network
//! call is made.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::extract::{self, ExtractedSeries, ExtractedValues, QueryType};

/// Timeout applied to every aggregator call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned when talking to the aggregator.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The datasource address has not been set.
    #[error("datasource address is not configured")]
    NotConfigured,
    /// The datasource address lacks an explicit scheme.
    #[error("datasource address must include http:// or https://")]
    MissingScheme,
    /// The query named no device.
    #[error("device ID is required")]
    MissingDevice,
    /// The query carried no xpath.
    #[error("xpath query is required")]
    MissingXpath,
    /// A `contains` query carried no string to search for.
    #[error("containsString is required for contains queries")]
    MissingContainsString,
    /// The HTTP call itself failed (connection, timeout, ...).
    #[error("failed to fetch from aggregator: {0}")]
    Transport(#[from] reqwest::Error),
    /// The aggregator answered with a non-200 status.
    #[error("aggregator returned status {status}: {body}")]
    Upstream {
        /// The upstream HTTP status code.
        status: StatusCode,
        /// The upstream response body, as text.
        body: String,
    },
    /// The aggregator's response body was not the expected JSON.
    #[error("failed to parse aggregator response JSON: {0}")]
    InvalidBody(#[source] serde_json::Error),
    /// A record carried a timestamp that is not valid RFC3339.
    #[error("invalid timestamp {timestamp:?} in aggregator response: {source}")]
    InvalidTimestamp {
        /// The offending timestamp string.
        timestamp: String,
        /// The underlying parse error.
        #[source]
        source: chrono::ParseError,
    },
}

/// One sample returned by the aggregator's timeseries endpoint.
///
/// Extra fields are ignored. The `xml` field is kept as a raw JSON value:
/// a record whose `xml` is missing or not a string is skipped during
/// extraction rather than failing the query.
#[derive(Debug, Deserialize)]
pub struct TimeseriesRecord {
    /// RFC3339 sample timestamp.
    pub timestamp: String,
    /// The XML snippet for this sample, if present and a string.
    #[serde(default)]
    pub xml: Option<Value>,
}

#[derive(Serialize)]
struct TimeseriesRequest<'a> {
    #[serde(rename = "xpathQuery")]
    xpath_query: &'a str,
}

/// Client for one datasource instance's aggregator.
///
/// Cheap to construct per request: the underlying `reqwest::Client`
/// connection pool is shared and cloned in.
#[derive(Clone, Debug)]
pub struct AggregatorClient {
    address: String,
    http: reqwest::Client,
}

impl AggregatorClient {
    /// Create a client for the aggregator at `address`.
    pub fn new(address: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            address: address.into(),
            http,
        }
    }

    fn base(&self) -> Result<&str, FetchError> {
        if self.address.is_empty() {
            return Err(FetchError::NotConfigured);
        }
        if !self.address.starts_with("http://") && !self.address.starts_with("https://") {
            return Err(FetchError::MissingScheme);
        }
        Ok(&self.address)
    }

    /// Fetch the raw device inventory.
    ///
    /// The body is returned byte-for-byte so the resource endpoint can
    /// forward it without reshaping.
    pub async fn devices(&self) -> Result<Bytes, FetchError> {
        let url = format!("{}/devices", self.base()?);
        debug!(url, "fetching device list");
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status != StatusCode::OK {
            return Err(FetchError::Upstream {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }

    /// Query one device's time series and extract a value from each record
    /// according to the query type.
    ///
    /// Records are returned in upstream order, without sorting or
    /// deduplication. Records without a string `xml` field are skipped; a
    /// record with an unparseable timestamp fails the whole query.
    pub async fn device_series(
        &self,
        device: &str,
        xpath: &str,
        query_type: QueryType,
        contains_string: Option<&str>,
    ) -> Result<ExtractedSeries, FetchError> {
        let base = self.base()?;
        if device.is_empty() {
            return Err(FetchError::MissingDevice);
        }
        if xpath.is_empty() {
            return Err(FetchError::MissingXpath);
        }
        let needle = match (query_type, contains_string) {
            (QueryType::Contains, Some(needle)) => needle,
            (QueryType::Contains, None) => return Err(FetchError::MissingContainsString),
            (QueryType::Int, _) => "",
        };

        let url = format!("{base}/timeseries/{device}");
        debug!(url, xpath, ?query_type, "querying device timeseries");
        let response = self
            .http
            .post(&url)
            .header(http::header::ACCEPT, "*/*")
            .json(&TimeseriesRequest { xpath_query: xpath })
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status != StatusCode::OK {
            return Err(FetchError::Upstream {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        let records: Vec<TimeseriesRecord> =
            serde_json::from_slice(&body).map_err(FetchError::InvalidBody)?;

        let mut series = ExtractedSeries::empty(query_type);
        for record in records {
            let Some(xml) = record.xml.as_ref().and_then(Value::as_str) else {
                continue;
            };
            let time = DateTime::parse_from_rfc3339(&record.timestamp)
                .map_err(|source| FetchError::InvalidTimestamp {
                    timestamp: record.timestamp.clone(),
                    source,
                })?
                .with_timezone(&Utc);
            series.times.push(time);
            match &mut series.values {
                ExtractedValues::Int(values) => values.push(extract::first_integer(xml)),
                ExtractedValues::Contains(values) => values.push(xml.contains(needle)),
            }
        }
        Ok(series)
    }
}
