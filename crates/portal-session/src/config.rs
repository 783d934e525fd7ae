use std::time::Duration;

use portal_core::ids::ModelId;
use portal_core::tools::ToolDefinition;
use portal_settings::PortalSettings;

use crate::throttle::DEFAULT_THROTTLE_INTERVAL;
use crate::tools::default_tools;

/// The model a turn runs against and its context capacity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSelection {
    pub model_id: ModelId,
    pub model_name: String,
    pub max_tokens: u64,
}

impl ModelSelection {
    pub fn new(model_id: impl Into<String>, model_name: impl Into<String>, max_tokens: u64) -> Self {
        Self {
            model_id: ModelId::from_raw(model_id),
            model_name: model_name.into(),
            max_tokens,
        }
    }
}

/// Fixed per-session behaviour.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub throttle_interval: Duration,
    /// Permit turns without a signed-in user or open conversation.
    pub allow_anonymous: bool,
    /// How many stored model contexts to restore on conversation load.
    pub usage_history_limit: usize,
    pub default_model: ModelSelection,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            allow_anonymous: false,
            usage_history_limit: 25,
            default_model: ModelSelection::new("gpt-4o-mini", "GPT-4o mini", 128_000),
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &PortalSettings) -> Self {
        Self {
            throttle_interval: Duration::from_millis(settings.session.throttle_interval_ms),
            allow_anonymous: settings.session.allow_anonymous,
            usage_history_limit: settings.session.usage_history_limit,
            default_model: ModelSelection::new(
                settings.model.default_model.clone(),
                settings.model.default_model_name.clone(),
                settings.model.default_max_tokens,
            ),
        }
    }
}

/// Per-turn switches, passed with each `send`.
#[derive(Clone, Debug)]
pub struct TurnOptions {
    pub deep_research: bool,
    pub context_injection: bool,
    pub thinking: bool,
    pub widget_session_id: Option<String>,
    pub tools: Vec<ToolDefinition>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            deep_research: false,
            context_injection: false,
            thinking: false,
            widget_session_id: None,
            tools: default_tools(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_settings() {
        let mut settings = PortalSettings::default();
        settings.session.throttle_interval_ms = 250;
        settings.session.allow_anonymous = true;
        settings.model.default_model = "llama3".into();
        settings.model.default_max_tokens = 8000;

        let config = SessionConfig::from_settings(&settings);
        assert_eq!(config.throttle_interval, Duration::from_millis(250));
        assert!(config.allow_anonymous);
        assert_eq!(config.default_model.model_id.as_str(), "llama3");
        assert_eq!(config.default_model.max_tokens, 8000);
    }

    #[test]
    fn default_turn_options_offer_web_search() {
        let opts = TurnOptions::default();
        assert!(!opts.deep_research);
        assert_eq!(opts.tools.len(), 1);
    }
}
