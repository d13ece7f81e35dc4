use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PilotError, PilotResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub model: ModelConfig,
    pub limits: SnapshotLimits,
    pub timings: Timings,
    pub browser: BrowserConfig,
    pub agent: AgentLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            temperature: 0.2,
        }
    }
}

/// Caps applied while the semantic tree is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotLimits {
    /// Materialized semantic nodes per snapshot.
    pub max_nodes: usize,
    /// Traversal depth below `<body>`.
    pub max_depth: usize,
    /// Elements deeper than this are never classified themselves, only inherit.
    pub section_depth: usize,
    /// Characters kept from an element's text.
    pub text_cap: usize,
    /// Raw elements the in-page walker may return.
    pub raw_node_cap: usize,
    /// Elements starting further than this many viewport heights down are culled.
    pub fold_viewports: f64,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_nodes: 500,
            max_depth: 30,
            section_depth: 12,
            text_cap: 100,
            raw_node_cap: 5000,
            fold_viewports: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub dom_ready_ms: u64,
    pub network_idle_ms: u64,
    pub busy_indicator_ms: u64,
    pub settle_ms: u64,
    pub poll_interval_ms: u64,
    pub locate_ms: u64,
    pub scroll_into_view_ms: u64,
    pub action_ms: u64,
    pub navigate_ms: u64,
    pub wait_action_ms: u64,
    pub scroll_settle_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            dom_ready_ms: 3000,
            network_idle_ms: 3000,
            busy_indicator_ms: 2000,
            settle_ms: 500,
            poll_interval_ms: 100,
            locate_ms: 10_000,
            scroll_into_view_ms: 2000,
            action_ms: 5000,
            navigate_ms: 30_000,
            wait_action_ms: 2000,
            scroll_settle_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    /// DevTools endpoint of an already running Chrome to attach to first.
    pub cdp_attach_url: Option<String>,
    pub chrome_path: Option<PathBuf>,
    pub profile_dir: Option<PathBuf>,
    pub idle_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            cdp_attach_url: Some("http://127.0.0.1:9222".to_string()),
            chrome_path: None,
            profile_dir: None,
            idle_timeout_secs: 600,
        }
    }
}

impl BrowserConfig {
    /// Persistent profile directory, defaulting to the user's local data dir.
    pub fn resolved_profile_dir(&self) -> PilotResult<PathBuf> {
        if let Some(dir) = &self.profile_dir {
            return Ok(dir.clone());
        }
        dirs::data_local_dir()
            .map(|d| d.join("page-pilot").join("profile"))
            .ok_or_else(|| PilotError::Config("no local data directory for the browser profile".into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLimits {
    pub observation_count: usize,
    pub extract_char_cap: usize,
    pub max_steps: usize,
    pub screenshot_quality: u32,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            observation_count: 5,
            extract_char_cap: 15_000,
            max_steps: 25,
            screenshot_quality: 60,
        }
    }
}

impl PilotConfig {
    /// Loads `.env` if present, then applies environment overrides.
    pub fn from_env() -> PilotResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> PilotResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(key) = lookup("OPENAI_API_KEY") {
            config.model.api_key = key;
        }
        if let Some(base) = lookup("PILOT_API_BASE") {
            config.model.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("PILOT_MODEL") {
            config.model.model = model;
        }
        if let Some(temperature) = lookup("PILOT_TEMPERATURE") {
            config.model.temperature = parse("PILOT_TEMPERATURE", &temperature)?;
        }
        if let Some(headless) = lookup("PILOT_HEADLESS") {
            config.browser.headless = parse("PILOT_HEADLESS", &headless)?;
        }
        if let Some(url) = lookup("PILOT_CDP_URL") {
            config.browser.cdp_attach_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(path) = lookup("PILOT_CHROME_PATH") {
            config.browser.chrome_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup("PILOT_PROFILE_DIR") {
            config.browser.profile_dir = Some(PathBuf::from(dir));
        }
        if let Some(steps) = lookup("PILOT_MAX_STEPS") {
            config.agent.max_steps = parse("PILOT_MAX_STEPS", &steps)?;
        }
        if let Some(nodes) = lookup("PILOT_MAX_NODES") {
            config.limits.max_nodes = parse("PILOT_MAX_NODES", &nodes)?;
        }

        tracing::debug!(
            target: "pilot::config",
            model = %config.model.model,
            headless = config.browser.headless,
            "configuration loaded"
        );
        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> PilotResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| PilotError::Config(format!("{key} has an invalid value: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_bounds() {
        let config = PilotConfig::default();
        assert_eq!(config.timings.locate_ms, 10_000);
        assert_eq!(config.timings.settle_ms, 500);
        assert_eq!(config.agent.observation_count, 5);
        assert_eq!(config.agent.extract_char_cap, 15_000);
    }

    #[test]
    fn env_overrides_apply() {
        let config = PilotConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("PILOT_MODEL", "gpt-4o-mini"),
            ("PILOT_HEADLESS", "false"),
            ("PILOT_API_BASE", "http://localhost:8080/v1/"),
            ("PILOT_CDP_URL", ""),
        ]))
        .unwrap();
        assert_eq!(config.model.api_key, "sk-test");
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert_eq!(config.model.api_base, "http://localhost:8080/v1");
        assert!(!config.browser.headless);
        assert!(config.browser.cdp_attach_url.is_none());
    }

    #[test]
    fn invalid_number_is_config_error() {
        let err = PilotConfig::from_lookup(lookup(&[("PILOT_MAX_STEPS", "many")])).unwrap_err();
        assert!(matches!(err, PilotError::Config(_)));
    }
}
