use crate::retry::{RetryConfig, RetryPolicy};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_SPEECH_URL: &str = "https://speech.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-pro-latest";
pub const DEFAULT_MAPS_URL: &str = "https://maps.googleapis.com";
pub const DEFAULT_ROUTES_URL: &str = "https://routes.googleapis.com";
pub const DEFAULT_ROADS_URL: &str = "https://roads.googleapis.com";

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_gemini_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speech_url")]
    pub base_url: String,
}

/// `[maps]` table for the hospital locator (geocoding, places, routes, roads).
#[derive(Debug, Clone, Deserialize)]
pub struct MapsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_radius_meters")]
    pub radius_meters: u32,
    /// Result pages fetched per nearby search (the service caps this at 3)
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// A fresh `next_page_token` is not valid until a short while after it is issued
    #[serde(default = "default_page_token_delay_secs")]
    pub page_token_delay_secs: f64,
    #[serde(default = "default_maps_url")]
    pub maps_url: String,
    #[serde(default = "default_routes_url")]
    pub routes_url: String,
    #[serde(default = "default_roads_url")]
    pub roads_url: String,
}

/// `[retry]` table; durations are given in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
            multiplier: default_multiplier(),
            jitter_secs: default_jitter_secs(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> Result<RetryConfig> {
        let initial_delay = Duration::try_from_secs_f64(self.initial_delay_secs)
            .context("retry.initial_delay_secs must be a non-negative number")?;
        let jitter = Duration::try_from_secs_f64(self.jitter_secs)
            .context("retry.jitter_secs must be a non-negative number")?;
        let config = RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay,
            multiplier: self.multiplier,
            jitter,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy::new(self.to_retry_config()?)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gemini: GeminiConfig,
    pub speech: Option<SpeechConfig>,
    pub maps: Option<MapsConfig>,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Config {
    /// Load `config.toml` from the working directory.
    pub fn new() -> Result<Self> {
        Self::from_path("config.toml")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config = Self::from_toml(&config_str)?;
        config.apply_env_overrides();
        config.validate()?;
        info!(
            "Config: model={} temperature={} retry={:?}",
            config.gemini.model, config.gemini.temperature, config.retry
        );
        Ok(config)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str)?;
        Ok(config)
    }

    /// `GEMINI_API_KEY`, `SPEECH_API_KEY` and `MAPS_API_KEY` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                self.gemini.api_key = key;
            }
        }
        if let (Some(speech), Ok(key)) = (self.speech.as_mut(), std::env::var("SPEECH_API_KEY")) {
            if !key.is_empty() {
                speech.api_key = key;
            }
        }
        if let (Some(maps), Ok(key)) = (self.maps.as_mut(), std::env::var("MAPS_API_KEY")) {
            if !key.is_empty() {
                maps.api_key = key;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.gemini.api_key.is_empty() {
            anyhow::bail!("gemini.api_key is not set (config.toml or GEMINI_API_KEY)");
        }
        if !(0.0..=2.0).contains(&self.gemini.temperature) {
            anyhow::bail!(
                "gemini.temperature must be within 0.0..=2.0, got {}",
                self.gemini.temperature
            );
        }
        if let Some(maps) = &self.maps {
            if maps.max_pages == 0 {
                anyhow::bail!("maps.max_pages must be at least 1");
            }
            Duration::try_from_secs_f64(maps.page_token_delay_secs)
                .context("maps.page_token_delay_secs must be a non-negative number")?;
        }
        self.retry.to_retry_config()?;
        Ok(())
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        self.retry.to_policy()
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_gemini_url() -> String {
    DEFAULT_GEMINI_URL.to_string()
}

fn default_speech_url() -> String {
    DEFAULT_SPEECH_URL.to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_region() -> String {
    "in".to_string()
}

fn default_radius_meters() -> u32 {
    25_000
}

fn default_max_pages() -> u32 {
    3
}

fn default_page_token_delay_secs() -> f64 {
    2.0
}

fn default_maps_url() -> String {
    DEFAULT_MAPS_URL.to_string()
}

fn default_routes_url() -> String {
    DEFAULT_ROUTES_URL.to_string()
}

fn default_roads_url() -> String {
    DEFAULT_ROADS_URL.to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_secs() -> f64 {
    1.0
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_secs() -> f64 {
    1.0
}
