//! Environment-driven gateway settings.

use crate::llm::OllamaConfig;

/// Runtime configuration, read once at startup.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `SECURAG_SERVER_PORT` | `5000` | TCP port to listen on. |
/// | `SECURAG_SERVER_DB_URI` | *(empty)* | Audit DB: `sqlite:` URI or a bare path to a local SQLite file. |
/// | `SECURAG_SERVER_TABLE_NAME` | `audit_log` | Audit table identifier. |
/// | `SECURAG_SERVER_WRITE_LOGS` | `false` | Gates every persistence path. |
/// | `HF_AUTH_TOKEN` | *(none)* | Enables the hosted classifier modules in the default policy. |
///
/// The `OLLAMA_*` variables are documented on [`OllamaConfig`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub db_uri: String,
    pub table_name: String,
    pub write_logs: bool,
    pub hf_auth_token: Option<String>,
    pub ollama: OllamaConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 5000,
            db_uri: String::new(),
            table_name: "audit_log".to_string(),
            write_logs: false,
            hf_auth_token: None,
            ollama: OllamaConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: std::env::var("SECURAG_SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            db_uri: std::env::var("SECURAG_SERVER_DB_URI")
                .map(|v| v.trim().to_string())
                .unwrap_or(defaults.db_uri),
            table_name: std::env::var("SECURAG_SERVER_TABLE_NAME")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.table_name),
            write_logs: std::env::var("SECURAG_SERVER_WRITE_LOGS")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.write_logs),
            hf_auth_token: std::env::var("HF_AUTH_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            ollama: OllamaConfig::from_env(),
        }
    }
}

pub(crate) fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}
