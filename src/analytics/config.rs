use std::env;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::analytics::constants::{DEFAULT_DATA_LAYER_NAME, DEFAULT_GTAG_NAME};
use crate::analytics::error::{invalid_argument, AnalyticsResult};

/// Environment variable consulted by [`GtagSettings::from_env`].
pub const GTAG_SETTINGS_ENV: &str = "GTAG_SETTINGS";

/// Names under which the shared queue and the dispatch function are exposed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GtagSettings {
    pub data_layer_name: String,
    pub gtag_name: String,
}

impl Default for GtagSettings {
    fn default() -> Self {
        Self {
            data_layer_name: DEFAULT_DATA_LAYER_NAME.to_string(),
            gtag_name: DEFAULT_GTAG_NAME.to_string(),
        }
    }
}

impl GtagSettings {
    pub fn with_data_layer_name(mut self, name: impl Into<String>) -> Self {
        self.data_layer_name = name.into();
        self
    }

    pub fn with_gtag_name(mut self, name: impl Into<String>) -> Self {
        self.gtag_name = name.into();
        self
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.data_layer_name.trim().is_empty() {
            return Err(invalid_argument("Data layer name must not be empty"));
        }
        if self.gtag_name.trim().is_empty() {
            return Err(invalid_argument("Gtag function name must not be empty"));
        }
        Ok(())
    }

    /// Reads settings from `GTAG_SETTINGS`, which may hold a JSON object
    /// (`{"dataLayerName": "...", "gtagName": "..."}`) or a `key=value` list
    /// (`dataLayerName=...,gtagName=...`). Missing keys keep their defaults.
    pub fn from_env() -> AnalyticsResult<Self> {
        match env::var(GTAG_SETTINGS_ENV) {
            Ok(raw) => Self::parse(&raw),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn parse(raw: &str) -> AnalyticsResult<Self> {
        let value = parse_settings_source(raw).ok_or_else(|| {
            invalid_argument(format!("{GTAG_SETTINGS_ENV} is neither a JSON object nor a key=value list"))
        })?;
        let settings: GtagSettings = serde_json::from_value(value)
            .map_err(|err| invalid_argument(format!("Invalid gtag settings: {err}")))?;
        settings.validate()?;
        Ok(settings)
    }
}

fn parse_settings_source(raw: &str) -> Option<Value> {
    if let Ok(json) = serde_json::from_str::<Value>(raw) {
        return json.is_object().then_some(json);
    }
    parse_key_value_settings(raw)
}

fn parse_key_value_settings(raw: &str) -> Option<Value> {
    let mut map = Map::new();
    for entry in raw.split(',') {
        let (key, value) = entry.split_once('=')?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            continue;
        }
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    (!map.is_empty()).then_some(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_gtag_snippet() {
        let settings = GtagSettings::default();
        assert_eq!(settings.data_layer_name, "dataLayer");
        assert_eq!(settings.gtag_name, "gtag");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_blank_names() {
        let err = GtagSettings::default()
            .with_gtag_name("  ")
            .validate()
            .unwrap_err();
        assert_eq!(err.code_str(), "analytics/invalid-argument");

        let err = GtagSettings::default()
            .with_data_layer_name("")
            .validate()
            .unwrap_err();
        assert_eq!(err.code_str(), "analytics/invalid-argument");
    }

    #[test]
    fn parses_json_and_key_value_sources() {
        let json = GtagSettings::parse(r#"{"dataLayerName": "customLayer"}"#).unwrap();
        assert_eq!(json, GtagSettings::default().with_data_layer_name("customLayer"));

        let pairs = GtagSettings::parse("dataLayerName=layer, gtagName=track").unwrap();
        assert_eq!(pairs.data_layer_name, "layer");
        assert_eq!(pairs.gtag_name, "track");

        assert!(GtagSettings::parse("[1, 2]").is_err());
        assert!(GtagSettings::parse("not settings").is_err());
        assert!(GtagSettings::parse(r#"{"gtagName": ""}"#).is_err());
    }
}
