//! User settings, stored as `settings.toml` next to the geocoding cache.
//!
//! ```no_run
//! use geotagger::config;
//!
//! let mut config = config::load().unwrap_or_default();
//! config.cache_precision = 4;
//! config::save(&config).expect("Failed to save config");
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::cache::{self, DEFAULT_MAX_AGE_DAYS, DEFAULT_PRECISION};
use crate::error::{Error, Result};
use crate::geocode::{DEFAULT_LANGUAGE, DEFAULT_USER_AGENT};
use crate::photo_metadata::{WriteMode, DEFAULT_EXIFTOOL};

const CONFIG_FILE: &str = "settings.toml";
pub const MAX_CACHE_AGE_DAYS: u32 = 365;

pub const DEFAULT_FILE_TYPES: [&str; 11] = [
    ".jpg", ".jpeg", ".png", ".tiff", ".tif", ".dng", ".raw", ".cr2", ".nef", ".arw", ".orf",
];

/// Keys accepted by [`Config::set`].
pub const KEYS: [&str; 9] = [
    "exiftool_path",
    "file_types",
    "last_directory",
    "cache_precision",
    "cache_max_age_days",
    "skip_if_exists",
    "language",
    "write_mode",
    "user_agent",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub exiftool_path: String,
    pub file_types: Vec<String>,
    pub last_directory: Option<PathBuf>,
    pub cache_precision: u8,
    pub cache_max_age_days: u32,
    pub skip_if_exists: bool,
    /// Language of the place names returned by the geocoder.
    pub language: String,
    pub write_mode: WriteMode,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exiftool_path: DEFAULT_EXIFTOOL.to_string(),
            file_types: DEFAULT_FILE_TYPES.iter().map(|t| t.to_string()).collect(),
            last_directory: None,
            cache_precision: DEFAULT_PRECISION,
            cache_max_age_days: DEFAULT_MAX_AGE_DAYS,
            skip_if_exists: true,
            language: DEFAULT_LANGUAGE.to_string(),
            write_mode: WriteMode::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Config {
    /// Updates one setting from its textual form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "exiftool_path" => self.exiftool_path = value.to_string(),
            "file_types" => {
                let types: Vec<String> = value
                    .split(',')
                    .map(normalize_file_type)
                    .filter(|t| t.len() > 1)
                    .collect();
                if types.is_empty() {
                    return Err(Error::Config("file_types must not be empty".into()));
                }
                self.file_types = types;
            }
            "last_directory" => self.last_directory = Some(PathBuf::from(value)),
            "cache_precision" => self.cache_precision = parse_precision(value)?,
            "cache_max_age_days" => self.cache_max_age_days = parse_max_age(value)?,
            "skip_if_exists" => {
                self.skip_if_exists = value
                    .parse()
                    .map_err(|_| Error::Config(format!("expected true or false, got '{}'", value)))?
            }
            "language" => self.language = value.to_string(),
            "write_mode" => self.write_mode = value.parse()?,
            "user_agent" => self.user_agent = value.to_string(),
            other => {
                return Err(Error::Config(format!(
                    "unknown key '{}', expected one of: {}",
                    other,
                    KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }

    /// File extensions without the leading dot, lower case.
    pub fn extensions(&self) -> Vec<String> {
        self.file_types
            .iter()
            .map(|t| t.trim_start_matches('.').to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

fn normalize_file_type(value: &str) -> String {
    let value = value.trim().to_ascii_lowercase();
    if value.starts_with('.') {
        value
    } else {
        format!(".{}", value)
    }
}

pub fn parse_precision(value: &str) -> Result<u8> {
    value
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|p| cache::precision_level(*p).is_some())
        .ok_or_else(|| Error::Config(format!("precision must be 3 to 7, got '{}'", value)))
}

pub fn parse_max_age(value: &str) -> Result<u32> {
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|d| (1..=MAX_CACHE_AGE_DAYS).contains(d))
        .ok_or_else(|| {
            Error::Config(format!(
                "max age must be 1 to {} days, got '{}'",
                MAX_CACHE_AGE_DAYS, value
            ))
        })
}

pub fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(cache::CACHE_DIR).join(CONFIG_FILE))
}

pub fn load() -> Result<Config> {
    if let Some(path) = default_path() {
        if path.exists() {
            return load_from_path(&path);
        }
    }
    Ok(Config::default())
}

pub fn save(config: &Config) -> Result<()> {
    if let Some(path) = default_path() {
        return save_to_path(config, &path);
    }
    Ok(())
}

pub fn load_from_path(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    match toml::from_str(&content) {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!("Ignoring invalid config {}: {}", path.display(), e);
            Ok(Config::default())
        }
    }
}

pub fn save_to_path(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config).map_err(|e| Error::Config(e.to_string()))?;
    fs::write(path, content)?;
    Ok(())
}
