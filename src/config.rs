//! Konfiguration
//!
//! Standardwerte können über Umgebungsvariablen überschrieben werden:
//!
//! | Variable | Bedeutung |
//! |---|---|
//! | `CONNECTSPHERE_USER_ID` | ID des lokalen Benutzers |
//! | `CONNECTSPHERE_RING_TIMEOUT_SECS` | Sekunden bis ein Anruf als unbeantwortet gilt |
//! | `CONNECTSPHERE_HISTORY_LIMIT` | Anzahl beim Start geladener Verlaufseinträge |
//! | `CONNECTSPHERE_DB_PATH` | Pfad zur SQLite-Datei |
//! | `CONNECTSPHERE_PERSIST_HISTORY` | `false` deaktiviert die Persistenz |
//! | `CONNECTSPHERE_LOG` | Standard-Logfilter (`RUST_LOG` hat Vorrang) |

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub local_user_id: String,
    pub ring_timeout_secs: u64,
    pub history_limit: usize,
    pub database_path: Option<PathBuf>,
    pub persist_history: bool,
    pub log_filter: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            local_user_id: "local-user".to_string(),
            ring_timeout_secs: 45,
            history_limit: 200,
            database_path: None,
            persist_history: true,
            log_filter: "connectsphere_calls=debug".to_string(),
        }
    }
}

impl CallConfig {
    /// Lädt die Konfiguration aus der Prozessumgebung
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Lädt die Konfiguration über eine beliebige Quelle
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(user_id) = lookup("CONNECTSPHERE_USER_ID") {
            let user_id = user_id.trim();
            if user_id.is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: "CONNECTSPHERE_USER_ID",
                    value: user_id.to_string(),
                });
            }
            config.local_user_id = user_id.to_string();
        }
        if let Some(value) = lookup("CONNECTSPHERE_RING_TIMEOUT_SECS") {
            config.ring_timeout_secs = parse_number("CONNECTSPHERE_RING_TIMEOUT_SECS", &value)?;
            if config.ring_timeout_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "CONNECTSPHERE_RING_TIMEOUT_SECS",
                    value,
                });
            }
        }
        if let Some(value) = lookup("CONNECTSPHERE_HISTORY_LIMIT") {
            config.history_limit = parse_number("CONNECTSPHERE_HISTORY_LIMIT", &value)?;
        }
        if let Some(path) = lookup("CONNECTSPHERE_DB_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup("CONNECTSPHERE_PERSIST_HISTORY") {
            config.persist_history = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "CONNECTSPHERE_PERSIST_HISTORY",
                        value,
                    })
                }
            };
        }
        if let Some(filter) = lookup("CONNECTSPHERE_LOG") {
            config.log_filter = filter;
        }

        Ok(config)
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        })
}
