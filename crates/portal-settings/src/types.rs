//! Settings schema. Every section has compiled defaults so a partial
//! settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortalSettings {
    pub gateway: GatewaySettings,
    pub session: SessionSettings,
    pub model: ModelSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySettings {
    /// Full URL of the streaming chat endpoint.
    pub url: String,
    pub connect_timeout_ms: u64,
    /// Sent as `X-API-Key` when present.
    pub api_key: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/chat".into(),
            connect_timeout_ms: 30_000,
            api_key: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
    /// Minimum spacing between streamed content commits.
    pub throttle_interval_ms: u64,
    /// Allow turns without a signed-in user or an open conversation.
    pub allow_anonymous: bool,
    /// How many persisted model contexts to restore when a conversation opens.
    pub usage_history_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            throttle_interval_ms: 500,
            allow_anonymous: false,
            usage_history_limit: 25,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelSettings {
    pub default_model: String,
    pub default_model_name: String,
    pub default_max_tokens: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".into(),
            default_model_name: "GPT-4o mini".into(),
            default_max_tokens: 128_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageSettings {
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: portal_dir().join("database/portal.db").display().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    pub level: String,
    /// Persist warn+ records to SQLite.
    pub log_to_sqlite: bool,
    pub log_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            log_to_sqlite: true,
            log_db_path: portal_dir().join("database/logs.db").display().to_string(),
        }
    }
}

/// `~/.portal`, falling back to `/tmp/.portal` without a home directory.
pub fn portal_dir() -> std::path::PathBuf {
    std::env::var("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("/tmp"))
        .join(".portal")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = PortalSettings::default();
        assert_eq!(s.session.throttle_interval_ms, 500);
        assert_eq!(s.session.usage_history_limit, 25);
        assert!(!s.session.allow_anonymous);
        assert_eq!(s.model.default_max_tokens, 128_000);
        assert!(s.gateway.api_key.is_none());
        assert!(s.storage.db_path.ends_with("portal.db"));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(PortalSettings::default()).unwrap();
        assert_eq!(json["session"]["throttleIntervalMs"], 500);
        assert_eq!(json["gateway"]["connectTimeoutMs"], 30_000);
    }
}
