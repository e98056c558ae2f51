//! Environment-driven runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::gate::GateConfig;
use crate::session::DEFAULT_EXEC_TIMEOUT;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Directory holding run records and run working directories.
    pub data_dir: PathBuf,
    pub gate: GateConfig,
    pub exec_timeout: Duration,
    /// Interpreter executable for the session registry.
    pub python: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5800,
            data_dir: PathBuf::from("./data"),
            gate: GateConfig::Pattern,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            python: "python3".to_string(),
        }
    }
}

impl Config {
    /// Read configuration from `TRAINLET_*` variables, falling back to the
    /// defaults above. `TRAINLET_GATE=llm` requires `TRAINLET_GATE_URL`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let gate = match std::env::var("TRAINLET_GATE").as_deref() {
            Ok("llm") => match std::env::var("TRAINLET_GATE_URL") {
                Ok(url) => GateConfig::Llm {
                    url,
                    auth_token: std::env::var("TRAINLET_GATE_TOKEN").ok(),
                },
                Err(_) => {
                    tracing::warn!("TRAINLET_GATE=llm without TRAINLET_GATE_URL, using pattern gate");
                    GateConfig::Pattern
                }
            },
            _ => GateConfig::Pattern,
        };

        Self {
            host: std::env::var("TRAINLET_HOST").unwrap_or(defaults.host),
            port: std::env::var("TRAINLET_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            data_dir: std::env::var("TRAINLET_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            gate,
            exec_timeout: std::env::var("TRAINLET_EXEC_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.exec_timeout),
            python: std::env::var("TRAINLET_PYTHON").unwrap_or(defaults.python),
        }
    }
}
