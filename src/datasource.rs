//! The Grafana-facing plugin services.
//!
//! [`NetconfDatasource`] implements the SDK's [`backend::DataService`]
//! (per-panel queries), [`backend::ResourceService`] (the device list
//! proxy used by the query editor) and [`backend::DiagnosticsService`]
//! (the 'Save & Test' health check).

use std::convert::Infallible;

use bytes::Bytes;
use futures_util::stream::FuturesOrdered;
use grafana_plugin_sdk::{backend, data, prelude::*};
use http::Response;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{
    aggregator::{AggregatorClient, FetchError, REQUEST_TIMEOUT},
    extract::{ExtractedSeries, ExtractedValues, QueryType},
    settings::AggregatorSettings,
};

/// The netconf aggregator datasource plugin.
///
/// Holds only the shared HTTP connection pool; instance settings arrive
/// with each request in the plugin context and are read-only.
#[derive(Clone, Debug, GrafanaPlugin)]
#[grafana_plugin(plugin_type = "datasource", json_data = "AggregatorSettings")]
pub struct NetconfDatasource {
    http: reqwest::Client,
}

impl NetconfDatasource {
    /// Create the plugin service with a shared HTTP client bound to the
    /// aggregator call timeout.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized.
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self { http }
    }

    fn client(&self, settings: &AggregatorSettings) -> AggregatorClient {
        AggregatorClient::new(settings.address.clone(), self.http.clone())
    }
}

impl Default for NetconfDatasource {
    fn default() -> Self {
        Self::new()
    }
}

/// The query model sent by the frontend query editor.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetconfQuery {
    /// How to extract a value from each XML snippet.
    ///
    /// An unrecognized type fails deserialization, naming the offending
    /// type in the error.
    #[serde(rename = "type")]
    pub query_type: QueryType,
    /// XPATH-style location within the device's XML tree, passed through
    /// to the aggregator verbatim.
    #[serde(default)]
    pub xpath: String,
    /// Identifier of the device to query.
    #[serde(default)]
    pub device: String,
    /// Substring to look for; required for `contains` queries and ignored
    /// for `int` queries.
    #[serde(default)]
    pub contains_string: Option<String>,
}

/// An error for a single query in a batch.
///
/// Carries the query's `ref_id` so Grafana can line the error up with its
/// panel; sibling queries in the same batch are unaffected.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The request carried no datasource instance settings.
    #[error("missing datasource instance settings")]
    MissingInstanceSettings {
        /// The failing query's identifier.
        ref_id: String,
    },
    /// The query JSON did not match the query model.
    #[error("invalid query: {source}")]
    InvalidQuery {
        /// The failing query's identifier.
        ref_id: String,
        /// The underlying JSON error.
        source: serde_json::Error,
    },
    /// Fetching or extracting the device data failed.
    #[error("data fetch error: {source}")]
    Fetch {
        /// The failing query's identifier.
        ref_id: String,
        /// The underlying fetch error.
        source: FetchError,
    },
    /// The assembled frame failed validation.
    #[error("invalid frame: {source}")]
    Frame {
        /// The failing query's identifier.
        ref_id: String,
        /// The underlying frame error.
        source: data::Error,
    },
}

impl backend::DataQueryError for QueryError {
    fn ref_id(self) -> String {
        match self {
            Self::MissingInstanceSettings { ref_id }
            | Self::InvalidQuery { ref_id, .. }
            | Self::Fetch { ref_id, .. }
            | Self::Frame { ref_id, .. } => ref_id,
        }
    }

    fn status(&self) -> backend::DataQueryStatus {
        match self {
            Self::InvalidQuery { .. } | Self::MissingInstanceSettings { .. } => {
                backend::DataQueryStatus::BadRequest
            }
            Self::Fetch { source, .. } => match source {
                FetchError::MissingDevice
                | FetchError::MissingXpath
                | FetchError::MissingContainsString => backend::DataQueryStatus::ValidationFailed,
                _ => backend::DataQueryStatus::Internal,
            },
            Self::Frame { .. } => backend::DataQueryStatus::Internal,
        }
    }
}

/// Build the response frame for one query: a `time` column and a `value`
/// column typed per the query type.
fn to_frame(series: ExtractedSeries) -> data::Frame {
    let time = series.times.into_field("time");
    let value = match series.values {
        ExtractedValues::Int(values) => values.into_field("value"),
        ExtractedValues::Contains(values) => values.into_field("value"),
    };
    [time, value].into_frame("response")
}

/// Execute one query of a batch independently of its siblings.
async fn run_query(
    client: Option<AggregatorClient>,
    ref_id: String,
    query_json: Value,
) -> Result<backend::DataResponse, QueryError> {
    let model: NetconfQuery =
        serde_json::from_value(query_json).map_err(|source| QueryError::InvalidQuery {
            ref_id: ref_id.clone(),
            source,
        })?;
    let client = client.ok_or_else(|| QueryError::MissingInstanceSettings {
        ref_id: ref_id.clone(),
    })?;
    debug!(
        ref_id,
        device = model.device,
        xpath = model.xpath,
        query_type = ?model.query_type,
        "running query",
    );
    let series = client
        .device_series(
            &model.device,
            &model.xpath,
            model.query_type,
            model.contains_string.as_deref(),
        )
        .await
        .map_err(|source| QueryError::Fetch {
            ref_id: ref_id.clone(),
            source,
        })?;
    let frame = to_frame(series);
    let checked = frame.check().map_err(|source| QueryError::Frame {
        ref_id: ref_id.clone(),
        source,
    })?;
    Ok(backend::DataResponse::new(ref_id, vec![checked]))
}

#[backend::async_trait]
impl backend::DataService for NetconfDatasource {
    type Query = Value;
    type QueryError = QueryError;
    type Stream = backend::BoxDataResponseStream<Self::QueryError>;

    async fn query_data(
        &self,
        request: backend::QueryDataRequest<Self::Query, Self>,
    ) -> Self::Stream {
        let client = request
            .plugin_context
            .instance_settings
            .as_ref()
            .map(|settings| self.client(&settings.json_data));
        Box::pin(
            request
                .queries
                .into_iter()
                .map(|query| run_query(client.clone(), query.ref_id, query.query))
                .collect::<FuturesOrdered<_>>(),
        )
    }
}

/// Errors returned by the plugin's resource endpoints.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The requested resource path does not exist.
    #[error("resource not found")]
    NotFound,
    /// The request carried no datasource instance settings.
    #[error("missing datasource instance settings")]
    MissingInstanceSettings,
    /// Fetching from the aggregator failed.
    #[error("{0}")]
    Fetch(#[from] FetchError),
    /// The response could not be constructed.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
}

impl backend::ErrIntoHttpResponse for ResourceError {
    fn into_http_response(self) -> Result<Response<Bytes>, Box<dyn std::error::Error>> {
        let status = match &self {
            Self::NotFound => http::StatusCode::NOT_FOUND,
            Self::Fetch(FetchError::Upstream { status, .. }) => *status,
            _ => http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        Ok(Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(serde_json::to_vec(
                &serde_json::json!({"error": self.to_string()}),
            )?))?)
    }
}

#[backend::async_trait]
impl backend::ResourceService for NetconfDatasource {
    type Error = ResourceError;
    type InitialResponse = Response<Bytes>;
    type Stream = backend::BoxResourceStream<Self::Error>;

    async fn call_resource(
        &self,
        request: backend::CallResourceRequest<Self>,
    ) -> Result<(Self::InitialResponse, Self::Stream), Self::Error> {
        let path = request.request.uri().path().to_owned();
        debug!(path, "resource call");
        match path.as_str() {
            "/devices" => {
                let settings = request
                    .plugin_context
                    .instance_settings
                    .ok_or(ResourceError::MissingInstanceSettings)?;
                let body = self.client(&settings.json_data).devices().await?;
                Ok((
                    Response::builder()
                        .header(http::header::CONTENT_TYPE, "application/json")
                        .body(body)?,
                    Box::pin(futures_util::stream::empty()) as Self::Stream,
                ))
            }
            _ => Err(ResourceError::NotFound),
        }
    }
}

/// The health check validates configuration only; it deliberately does not
/// probe aggregator reachability.
fn health_response(settings: Option<&AggregatorSettings>) -> backend::CheckHealthResponse {
    match settings {
        None => {
            backend::CheckHealthResponse::error("missing datasource instance settings".to_string())
        }
        Some(settings) if settings.address.is_empty() => {
            backend::CheckHealthResponse::error("Address is missing".to_string())
        }
        Some(_) => backend::CheckHealthResponse::ok("Data source is working".to_string()),
    }
}

#[backend::async_trait]
impl backend::DiagnosticsService for NetconfDatasource {
    type CheckHealthError = Infallible;

    async fn check_health(
        &self,
        request: backend::CheckHealthRequest<Self>,
    ) -> Result<backend::CheckHealthResponse, Self::CheckHealthError> {
        Ok(health_response(
            request
                .plugin_context
                .instance_settings
                .as_ref()
                .map(|settings| &settings.json_data),
        ))
    }

    type CollectMetricsError = Infallible;

    async fn collect_metrics(
        &self,
        _request: backend::CollectMetricsRequest<Self>,
    ) -> Result<backend::CollectMetricsResponse, Self::CollectMetricsError> {
        Ok(backend::CollectMetricsResponse::new(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafana_plugin_sdk::backend::{DataQueryError, ErrIntoHttpResponse, HealthStatus};
    use chrono::{TimeZone, Utc};
    use grafana_plugin_sdk::arrow2::array::{Array, BooleanArray, Int64Array};
    use mockito::Server;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn client_for(address: impl Into<String>) -> AggregatorClient {
        AggregatorClient::new(address, reqwest::Client::new())
    }

    #[test]
    fn query_model_decodes_frontend_json() {
        let model: NetconfQuery = serde_json::from_value(json!({
            "type": "contains",
            "xpath": "/interfaces/interface",
            "device": "d1",
            "containsString": "oper-status"
        }))
        .unwrap();
        assert_eq!(model.query_type, QueryType::Contains);
        assert_eq!(model.xpath, "/interfaces/interface");
        assert_eq!(model.device, "d1");
        assert_eq!(model.contains_string.as_deref(), Some("oper-status"));
    }

    #[test]
    fn unsupported_query_type_names_the_type() {
        let err =
            serde_json::from_value::<NetconfQuery>(json!({"type": "float", "device": "d1"}))
                .unwrap_err();
        assert!(err.to_string().contains("float"), "message was: {err}");
    }

    #[test]
    fn int_frame_has_time_and_value_columns() {
        let series = ExtractedSeries {
            times: vec![Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap()],
            values: ExtractedValues::Int(vec![42]),
        };
        let frame = to_frame(series);
        assert_eq!(frame.name, "response");
        assert_eq!(frame.fields()[0].name, "time");
        assert_eq!(frame.fields()[1].name, "value");
        let values = frame.fields()[1]
            .values()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values.value(0), 42);
    }

    #[test]
    fn contains_frame_carries_booleans() {
        let series = ExtractedSeries {
            times: vec![
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).single().unwrap(),
            ],
            values: ExtractedValues::Contains(vec![true, false]),
        };
        let frame = to_frame(series);
        let values = frame.fields()[1]
            .values()
            .as_any()
            .downcast_ref::<BooleanArray>()
            .unwrap();
        assert!(values.value(0));
        assert!(!values.value(1));
    }

    #[tokio::test]
    async fn run_query_returns_a_response_for_valid_queries() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/timeseries/d1")
            .with_status(200)
            .with_body(r#"[{"timestamp":"2024-01-01T00:00:00Z","xml":"<load>42</load>"}]"#)
            .create_async()
            .await;

        let response = run_query(
            Some(client_for(server.url())),
            "A".to_string(),
            json!({"type": "int", "xpath": "/sys/load", "device": "d1"}),
        )
        .await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn malformed_query_fails_without_aborting_siblings() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/timeseries/d1")
            .with_status(200)
            .with_body(r#"[{"timestamp":"2024-01-01T00:00:00Z","xml":"<load>42</load>"}]"#)
            .create_async()
            .await;
        let client = client_for(server.url());

        let bad = run_query(
            Some(client.clone()),
            "A".to_string(),
            json!({"type": "float", "device": "d1"}),
        )
        .await;
        let good = run_query(
            Some(client),
            "B".to_string(),
            json!({"type": "int", "xpath": "/sys/load", "device": "d1"}),
        )
        .await;

        let err = bad.unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery { .. }));
        assert!(matches!(err.status(), backend::DataQueryStatus::BadRequest));
        assert_eq!(err.ref_id(), "A");
        assert!(good.is_ok());
    }

    #[tokio::test]
    async fn fetch_failures_are_server_errors() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/timeseries/d1")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = run_query(
            Some(client_for(server.url())),
            "A".to_string(),
            json!({"type": "int", "xpath": "/sys/load", "device": "d1"}),
        )
        .await
        .unwrap_err();

        assert!(matches!(err.status(), backend::DataQueryStatus::Internal));
        let msg = err.to_string();
        assert!(msg.contains("500"), "message was: {msg}");
        assert!(msg.contains("boom"), "message was: {msg}");
    }

    #[tokio::test]
    async fn empty_required_fields_fail_validation() {
        let err = run_query(
            Some(client_for("http://agg:8080")),
            "A".to_string(),
            json!({"type": "int", "xpath": "/sys/load"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.status(),
            backend::DataQueryStatus::ValidationFailed
        ));
        assert!(err.to_string().contains("device ID is required"));
    }

    #[tokio::test]
    async fn missing_settings_fail_the_query() {
        let err = run_query(
            None,
            "A".to_string(),
            json!({"type": "int", "xpath": "/sys/load", "device": "d1"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, QueryError::MissingInstanceSettings { .. }));
    }

    #[test]
    fn resource_errors_render_as_json_with_status() {
        let response = ResourceError::Fetch(FetchError::Upstream {
            status: http::StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        })
        .into_http_response()
        .unwrap();
        assert_eq!(response.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert!(body["error"].as_str().unwrap().contains("boom"));

        let response = ResourceError::NotFound.into_http_response().unwrap();
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn health_check_validates_configuration_only() {
        let healthy = health_response(Some(&AggregatorSettings {
            address: "http://agg:8080".to_string(),
        }));
        assert_eq!(healthy.status, HealthStatus::Ok);
        assert_eq!(healthy.message, "Data source is working");

        let unhealthy = health_response(Some(&AggregatorSettings {
            address: String::new(),
        }));
        assert_eq!(unhealthy.status, HealthStatus::Error);
        assert_eq!(unhealthy.message, "Address is missing");

        let unhealthy = health_response(None);
        assert_eq!(unhealthy.status, HealthStatus::Error);
    }
}
