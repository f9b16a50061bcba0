use crate::domain::timer::AlarmSettings;
use crate::infrastructure::credential_store::DEFAULT_CREDENTIAL_SERVICE;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::{DEFAULT_HIDDEN_SESSIONS_KEY, DEFAULT_SESSIONS_KEY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const TIMER_JSON: &str = "timer.json";
const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";
pub const API_BASE_URL_ENV: &str = "PRAYATNA_API_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_sessions_key")]
    pub sessions_storage_key: String,
    #[serde(default = "default_hidden_key")]
    pub hidden_sessions_storage_key: String,
    #[serde(default = "default_credential_service")]
    pub credential_service: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            api_base_url: default_api_base_url(),
            sessions_storage_key: default_sessions_key(),
            hidden_sessions_storage_key: default_hidden_key(),
            credential_service: default_credential_service(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold_seconds: u32,
    #[serde(default = "default_max_alarm")]
    pub max_alarm_seconds: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
            warning_threshold_seconds: default_warning_threshold(),
            max_alarm_seconds: default_max_alarm(),
        }
    }
}

impl TimerConfig {
    pub fn alarm_settings(&self) -> AlarmSettings {
        AlarmSettings {
            warning_threshold_seconds: self.warning_threshold_seconds,
            max_alarm_seconds: self.max_alarm_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBundle {
    pub app: AppConfig,
    pub timer: TimerConfig,
}

fn default_app_name() -> String {
    "Prayatna".to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_sessions_key() -> String {
    DEFAULT_SESSIONS_KEY.to_string()
}

fn default_hidden_key() -> String {
    DEFAULT_HIDDEN_SESSIONS_KEY.to_string()
}

fn default_credential_service() -> String {
    DEFAULT_CREDENTIAL_SERVICE.to_string()
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_warning_threshold() -> u32 {
    3
}

fn default_max_alarm() -> u32 {
    5
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": default_app_name(),
                "apiBaseUrl": DEFAULT_API_BASE_URL,
                "sessionsStorageKey": DEFAULT_SESSIONS_KEY,
                "hiddenSessionsStorageKey": DEFAULT_HIDDEN_SESSIONS_KEY,
                "credentialService": DEFAULT_CREDENTIAL_SERVICE
            }),
        ),
        (
            TIMER_JSON,
            serde_json::json!({
                "schema": 1,
                "tickMillis": default_tick_millis(),
                "warningThresholdSeconds": default_warning_threshold(),
                "maxAlarmSeconds": default_max_alarm()
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    let app: AppConfig = serde_json::from_value(read_config(&config_dir.join(APP_JSON))?)?;
    let timer: TimerConfig = serde_json::from_value(read_config(&config_dir.join(TIMER_JSON))?)?;
    if timer.tick_millis == 0 {
        return Err(InfraError::InvalidConfig(
            "timer.tickMillis must be > 0".to_string(),
        ));
    }
    Ok(ConfigBundle { app, timer })
}

/// Environment first, then `app.json`. Trailing slashes are dropped.
pub fn resolve_api_base_url<F>(app: &AppConfig, lookup: F) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let candidate = lookup(API_BASE_URL_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| app.api_base_url.trim().to_string());
    let normalized = candidate.trim_end_matches('/').to_string();
    if normalized.is_empty() {
        return Err(InfraError::InvalidConfig(
            "apiBaseUrl must not be empty".to_string(),
        ));
    }
    url::Url::parse(&normalized).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid apiBaseUrl '{normalized}': {error}"))
    })?;
    Ok(normalized)
}
