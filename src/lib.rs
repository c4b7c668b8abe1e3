/*! Grafana backend datasource plugin for a netconf aggregator service.

The aggregator owns a device inventory and per-device time series of
XML/NETCONF snippets, addressed by XPATH-style queries. This plugin turns
Grafana data queries into typed HTTP calls against the aggregator,
extracts a value from each returned snippet (the first integer in the
text, or a substring-containment boolean), and assembles the results into
time-series frames. It also proxies the aggregator's device list to the
frontend and answers health checks.
*/
#![deny(missing_docs)]

pub mod aggregator;
pub mod datasource;
pub mod extract;
pub mod settings;

pub use datasource::NetconfDatasource;
