use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::geocode::GeocoderConfig;

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct IncidentMapConfig {
    #[serde(default)]
    pub data: DataSection,
    #[serde(default)]
    pub geocoder: GeocoderSection,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct DataSection {
    /// Reporting year, e.g. "2019". Names the CSV, store and output files.
    pub year: Option<String>,
    /// Directory holding the yearly files, relative to the project root.
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct GeocoderSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub min_interval_ms: Option<u64>,
}

impl IncidentMapConfig {
    /// Resolve lookup settings: env > config > built-in default.
    pub fn geocoder_config_with_lookup<F>(&self, lookup_env: F) -> Result<GeocoderConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = GeocoderConfig::default();
        let section = &self.geocoder;
        Ok(GeocoderConfig {
            api_url: env_string(&lookup_env, "INCIDENTMAP_GEOCODER_URL")
                .or_else(|| section.api_url.clone())
                .unwrap_or(defaults.api_url),
            user_agent: env_string(&lookup_env, "INCIDENTMAP_USER_AGENT")
                .or_else(|| section.user_agent.clone())
                .unwrap_or(defaults.user_agent),
            timeout_ms: env_millis(&lookup_env, "INCIDENTMAP_GEOCODER_TIMEOUT_MS")?
                .or(section.timeout_ms)
                .unwrap_or(defaults.timeout_ms),
            min_interval_ms: env_millis(&lookup_env, "INCIDENTMAP_MIN_INTERVAL_MS")?
                .or(section.min_interval_ms)
                .unwrap_or(defaults.min_interval_ms),
        })
    }

    pub fn year(&self) -> Option<&str> {
        self.data
            .year
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Load and parse the config file. Returns the default config if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<IncidentMapConfig> {
    if !config_path.exists() {
        return Ok(IncidentMapConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: IncidentMapConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_string<F>(lookup_env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_millis<F>(lookup_env: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    env_string(lookup_env, key)
        .map(|value| {
            value
                .parse::<u64>()
                .with_context(|| {
                    format!("{key} must be a whole number of milliseconds, got '{value}'")
                })
        })
        .transpose()
}
