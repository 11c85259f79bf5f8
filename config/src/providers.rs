//! Typed accessors over the environment: model-tier provider bindings and
//! process-wide capacity settings.
//!
//! Tier bindings resolve per tier first (`MAESTRO_FAST_MODEL`, ...), falling
//! back to the shared `MAESTRO_MODEL` / `MAESTRO_API_KEY` / `MAESTRO_BASE_URL`
//! triple so a single-endpoint deployment needs three variables total.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Model tier: a role label resolved to a concrete provider binding at call time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    Mid,
    Intelligent,
    Verifier,
}

impl ModelTier {
    pub const ALL: [ModelTier; 4] = [
        ModelTier::Fast,
        ModelTier::Mid,
        ModelTier::Intelligent,
        ModelTier::Verifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Mid => "mid",
            ModelTier::Intelligent => "intelligent",
            ModelTier::Verifier => "verifier",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            ModelTier::Fast => "MAESTRO_FAST",
            ModelTier::Mid => "MAESTRO_MID",
            ModelTier::Intelligent => "MAESTRO_INTELLIGENT",
            ModelTier::Verifier => "MAESTRO_VERIFIER",
        }
    }
}

/// Concrete provider binding for one tier: model name, endpoint, key.
///
/// `api_key` stays optional here; the dispatcher surfaces a configuration
/// error at the first call that needs a missing key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderBinding {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Default endpoint when neither tier nor shared base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

fn env_or(tier_key: &str, shared_key: &str) -> Option<String> {
    std::env::var(tier_key)
        .or_else(|_| std::env::var(shared_key))
        .ok()
        .filter(|s| !s.trim().is_empty())
}

/// Provider bindings for all four tiers.
#[derive(Clone, Debug)]
pub struct TierBindings {
    pub fast: ProviderBinding,
    pub mid: ProviderBinding,
    pub intelligent: ProviderBinding,
    pub verifier: ProviderBinding,
}

impl TierBindings {
    /// Resolves all tiers from the environment.
    pub fn from_env() -> Self {
        Self {
            fast: Self::binding(ModelTier::Fast),
            mid: Self::binding(ModelTier::Mid),
            intelligent: Self::binding(ModelTier::Intelligent),
            verifier: Self::binding(ModelTier::Verifier),
        }
    }

    pub fn get(&self, tier: ModelTier) -> &ProviderBinding {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Mid => &self.mid,
            ModelTier::Intelligent => &self.intelligent,
            ModelTier::Verifier => &self.verifier,
        }
    }

    fn binding(tier: ModelTier) -> ProviderBinding {
        let prefix = tier.env_prefix();
        ProviderBinding {
            model: env_or(&format!("{prefix}_MODEL"), "MAESTRO_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url: env_or(&format!("{prefix}_BASE_URL"), "MAESTRO_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: env_or(&format!("{prefix}_API_KEY"), "MAESTRO_API_KEY"),
        }
    }
}

/// Process-wide capacity and cache settings.
#[derive(Clone, Debug)]
pub struct RuntimeCaps {
    /// Max in-flight LLM calls process-wide.
    pub global_llm_max: usize,
    /// Max concurrent web fetches.
    pub web_fetch_max: usize,
    /// Disk cache directory for web fetches.
    pub web_fetch_cache_dir: PathBuf,
    /// Web-fetch cache TTL in seconds.
    pub web_fetch_cache_ttl_secs: u64,
}

impl RuntimeCaps {
    pub fn from_env() -> Self {
        Self {
            global_llm_max: parse_env("GLOBAL_MAX_CONCURRENT_LLM_REQUESTS", 200),
            web_fetch_max: parse_env("WEB_FETCH_MAX_CONCURRENT", 3),
            web_fetch_cache_dir: std::env::var("MAESTRO_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| crate::maestro_home().join("cache").join("web_fetch")),
            web_fetch_cache_ttl_secs: parse_env("WEB_FETCH_CACHE_TTL_SECS", 24 * 60 * 60),
        }
    }
}

impl Default for RuntimeCaps {
    fn default() -> Self {
        Self {
            global_llm_max: 200,
            web_fetch_max: 3,
            web_fetch_cache_dir: crate::maestro_home().join("cache").join("web_fetch"),
            web_fetch_cache_ttl_secs: 24 * 60 * 60,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_falls_back_to_shared_binding() {
        std::env::set_var("MAESTRO_MODEL", "shared-model");
        std::env::set_var("MAESTRO_INTELLIGENT_MODEL", "big-model");
        let bindings = TierBindings::from_env();
        assert_eq!(bindings.get(ModelTier::Intelligent).model, "big-model");
        assert_eq!(bindings.get(ModelTier::Fast).model, "shared-model");
        std::env::remove_var("MAESTRO_MODEL");
        std::env::remove_var("MAESTRO_INTELLIGENT_MODEL");
    }

    #[test]
    fn missing_api_key_is_none() {
        std::env::remove_var("MAESTRO_API_KEY");
        std::env::remove_var("MAESTRO_VERIFIER_API_KEY");
        let b = TierBindings::from_env();
        assert!(b.get(ModelTier::Verifier).api_key.is_none());
    }

    #[test]
    fn caps_defaults() {
        std::env::remove_var("GLOBAL_MAX_CONCURRENT_LLM_REQUESTS");
        std::env::remove_var("WEB_FETCH_MAX_CONCURRENT");
        let caps = RuntimeCaps::from_env();
        assert_eq!(caps.global_llm_max, 200);
        assert_eq!(caps.web_fetch_max, 3);
        assert_eq!(caps.web_fetch_cache_ttl_secs, 86_400);
    }

    #[test]
    fn caps_read_env_overrides() {
        std::env::set_var("GLOBAL_MAX_CONCURRENT_LLM_REQUESTS", "17");
        let caps = RuntimeCaps::from_env();
        assert_eq!(caps.global_llm_max, 17);
        std::env::remove_var("GLOBAL_MAX_CONCURRENT_LLM_REQUESTS");
    }
}
