use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};

use crate::error::ChatError;
use crate::model::Model;

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=2.0;
pub const TEMPERATURE_STEP: f32 = 0.1;
pub const MAX_TOKENS: u32 = 4096;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8501";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Generation parameters for one request. Absent fields fall back to
/// [`Model::default`] and [`DEFAULT_TEMPERATURE`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GenerationConfig {
    pub model: Option<Model>,
    pub temperature: Option<f32>,
}

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.model = Some(model);
        self
    }

    /// Range-checked, then snapped to the nearest `TEMPERATURE_STEP`.
    pub fn with_temperature(mut self, temperature: f32) -> Result<Self, ChatError> {
        if !TEMPERATURE_RANGE.contains(&temperature) {
            return Err(ChatError::InvalidTemperature(temperature));
        }
        let steps_per_unit = (1.0 / TEMPERATURE_STEP).round();
        self.temperature = Some((temperature * steps_per_unit).round() / steps_per_unit);
        Ok(self)
    }

    pub fn resolved_model(&self) -> Model {
        self.model.unwrap_or_default()
    }

    pub fn resolved_temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }
}

/// Settings read from `~/.config/omnichat/config.json`.
///
/// Never holds the API key; that comes from the environment or the page.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub default_temperature: Option<f32>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub bind_address: Option<String>,
    #[serde(default)]
    pub session_ttl_secs: Option<u64>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            default_model: Some(Model::default().as_str().to_string()),
            default_temperature: Some(DEFAULT_TEMPERATURE),
            api_base_url: None,
            bind_address: Some(DEFAULT_BIND_ADDRESS.to_string()),
            session_ttl_secs: Some(DEFAULT_SESSION_TTL_SECS),
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    /// Session defaults derived from the file. Invalid entries are rejected
    /// rather than silently ignored.
    pub fn generation(&self) -> Result<GenerationConfig> {
        let mut generation = GenerationConfig::new();
        if let Some(name) = &self.default_model {
            let model = Model::from_str(name)
                .ok_or_else(|| anyhow!("Unknown default_model in config: {}", name))?;
            generation = generation.with_model(model);
        }
        if let Some(temperature) = self.default_temperature {
            generation = generation.with_temperature(temperature)?;
        }
        Ok(generation)
    }

    pub fn bind_address(&self) -> &str {
        self.bind_address.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS)
    }

    pub fn session_ttl_secs(&self) -> u64 {
        self.session_ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS)
    }

    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("omnichat").join("config.json"))
    }
}
