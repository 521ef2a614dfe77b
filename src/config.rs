//! Configuration for providers, warming, and the execution engine.
//!
//! Loaded from a TOML file (`docrelay.toml` or `config.toml` in the working
//! directory, or an explicit `--config` path), with environment variable
//! overrides for the engine tunables. API keys are never stored in config
//! files; providers read them from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub warm: WarmConfig,
    pub engine: EngineConfig,
}

/// Per-provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub gemini: GeminiConfig,
    pub groq: GroqConfig,
    pub deepseek: DeepSeekConfig,
    pub tesseract: TesseractConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub enabled: bool,
    /// Model to use (e.g. "gemini-1.5-flash", "gemini-1.5-pro").
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gemini-1.5-flash".to_string(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroqConfig {
    pub enabled: bool,
    /// Vision model to use.
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepSeekConfig {
    pub enabled: bool,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "deepseek-vl2".to_string(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    pub enabled: bool,
    /// Language for OCR (e.g. "eng", "chi_sim").
    pub language: String,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: "eng".to_string(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    120
}

/// Warm-session manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmConfig {
    /// Seconds between heartbeat pings, per provider.
    pub interval_secs: u64,
    /// Consecutive heartbeat failures before a provider is demoted to cold.
    /// A single failure is tolerated silently to avoid flapping.
    pub demote_after: u32,
}

impl Default for WarmConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            demote_after: 3,
        }
    }
}

impl WarmConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard deadline for racing mode, seconds.
    pub race_deadline_secs: u64,
    /// Per-attempt deadline in cascade mode, seconds.
    pub attempt_timeout_secs: u64,
    /// Maximum output tokens requested from model providers.
    pub max_output_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            race_deadline_secs: 12,
            attempt_timeout_secs: 12,
            max_output_tokens: 8192,
        }
    }
}

impl EngineConfig {
    pub fn race_deadline(&self) -> Duration {
        Duration::from_secs(self.race_deadline_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl Config {
    /// Load configuration from an explicit path or by probing the working
    /// directory, then apply environment overrides. Missing or unreadable
    /// files fall back to defaults with a log line.
    pub fn load(explicit: Option<&Path>) -> Self {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| Self::find_config_file(Path::new(".")));

        let config = match path {
            Some(p) => match std::fs::read_to_string(&p) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(config) => {
                        tracing::debug!("Loaded config from {}", p.display());
                        config
                    }
                    Err(e) => {
                        tracing::warn!("Invalid config {}: {}, using defaults", p.display(), e);
                        Config::default()
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config {}: {}, using defaults", p.display(), e);
                    Config::default()
                }
            },
            None => Config::default(),
        };

        config.with_env_overrides()
    }

    /// Look for a config file in the given directory.
    fn find_config_file(dir: &Path) -> Option<PathBuf> {
        for basename in ["docrelay", "config"] {
            let path = dir.join(format!("{}.toml", basename));
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Apply environment variable overrides for engine tunables.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(secs) = env_u64("DOCRELAY_RACE_DEADLINE_SECS") {
            self.engine.race_deadline_secs = secs;
        }
        if let Some(secs) = env_u64("DOCRELAY_ATTEMPT_TIMEOUT_SECS") {
            self.engine.attempt_timeout_secs = secs;
        }
        if let Some(secs) = env_u64("DOCRELAY_WARM_INTERVAL_SECS") {
            self.warm.interval_secs = secs;
        }
        self
    }
}

fn env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}
