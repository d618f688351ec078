//! Runtime settings (layered: code > env > defaults).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use strum::{Display, EnumString};

const DEFAULT_DECISION_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_DECISION_MODEL: &str = "gpt-4o-mini";

/// How duplicate operation names across servers are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CollisionPolicy {
    /// The most recently registered server owns the bare name.
    #[default]
    #[strum(serialize = "last_wins", serialize = "last_registration_wins")]
    LastRegistrationWins,
    /// Expose each operation as `<server_key>__<operation>`.
    #[strum(serialize = "namespace", serialize = "namespace_server_and_tool")]
    NamespaceServerAndTool,
}

/// Upper bounds for each suspending session step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub handshake: Duration,
    pub list: Duration,
    pub call: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            list: Duration::from_secs(30),
            call: Duration::from_secs(60),
        }
    }
}

/// Connection details for the decision model endpoint.
#[derive(Clone, PartialEq)]
pub struct DecisionSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
}

impl fmt::Debug for DecisionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DECISION_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_DECISION_MODEL.to_string(),
            temperature: 0.7,
        }
    }
}

/// Everything the lifecycle needs besides the server list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelaySettings {
    pub timeouts: SessionTimeouts,
    pub collision_policy: CollisionPolicy,
    pub decision: DecisionSettings,
}

impl RelaySettings {
    /// Load from environment variables (and `.env` if present).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(secs) = parse_secs(&lookup, "TOOLRELAY_HANDSHAKE_TIMEOUT_SECS") {
            settings.timeouts.handshake = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "TOOLRELAY_LIST_TIMEOUT_SECS") {
            settings.timeouts.list = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "TOOLRELAY_CALL_TIMEOUT_SECS") {
            settings.timeouts.call = secs;
        }

        if let Some(policy) = lookup("TOOLRELAY_COLLISIONS") {
            match CollisionPolicy::from_str(policy.trim()) {
                Ok(policy) => settings.collision_policy = policy,
                Err(_) => tracing::warn!(value = %policy, "ignoring unknown collision policy"),
            }
        }

        if let Some(url) = first_of(&lookup, &["TOOLRELAY_DECISION_BASE_URL", "OPENAI_BASE_URL"]) {
            settings.decision.base_url = url.trim_end_matches('/').to_string();
        }
        settings.decision.api_key =
            first_of(&lookup, &["TOOLRELAY_DECISION_API_KEY", "OPENAI_API_KEY"]);
        if let Some(model) = lookup("TOOLRELAY_DECISION_MODEL") {
            settings.decision.model = model;
        }
        if let Some(temperature) = lookup("TOOLRELAY_DECISION_TEMPERATURE")
            .and_then(|raw| raw.trim().parse::<f64>().ok())
        {
            settings.decision.temperature = temperature;
        }

        settings
    }

    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }
}

fn first_of(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty())
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => {
            tracing::warn!(key, value = %raw, "ignoring invalid timeout");
            None
        }
    }
}
