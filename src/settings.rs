//! Persisted datasource instance configuration.

use serde::Deserialize;

/// JSON settings stored by Grafana for each datasource instance.
///
/// Decoded by the SDK from the instance's `jsonData`. A missing `address`
/// key decodes to the empty string; it is rejected with a descriptive
/// error when a call is actually made, not at decode time.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorSettings {
    /// Base URL of the netconf aggregator, including the `http://` or
    /// `https://` scheme.
    #[serde(default)]
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_address() {
        let settings: AggregatorSettings =
            serde_json::from_str(r#"{"address": "http://agg:8080"}"#).unwrap();
        assert_eq!(settings.address, "http://agg:8080");
    }

    #[test]
    fn missing_address_decodes_to_empty() {
        let settings: AggregatorSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.address, "");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let settings: AggregatorSettings =
            serde_json::from_str(r#"{"address": "https://agg", "tlsSkipVerify": true}"#).unwrap();
        assert_eq!(settings.address, "https://agg");
    }
}
