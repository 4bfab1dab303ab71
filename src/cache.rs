use std::{
    collections::BTreeMap,
    fmt,
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::location::Location;

pub const CACHE_DIR: &str = ".geotagger";
pub const CACHE_FILE: &str = "geocoding_cache.json";
pub const DEFAULT_PRECISION: u8 = 5;
pub const DEFAULT_MAX_AGE_DAYS: u32 = 30;

#[derive(Debug, PartialEq)]
pub struct PrecisionLevel {
    pub digits: u8,
    pub accuracy: &'static str,
    pub description: &'static str,
}

pub const PRECISION_LEVELS: [PrecisionLevel; 5] = [
    PrecisionLevel {
        digits: 3,
        accuracy: "~111m",
        description: "districts and large areas",
    },
    PrecisionLevel {
        digits: 4,
        accuracy: "~11m",
        description: "street sections",
    },
    PrecisionLevel {
        digits: 5,
        accuracy: "~1m",
        description: "buildings",
    },
    PrecisionLevel {
        digits: 6,
        accuracy: "~0.1m",
        description: "exact position",
    },
    PrecisionLevel {
        digits: 7,
        accuracy: "~0.01m",
        description: "maximum accuracy",
    },
];

pub fn precision_level(digits: u8) -> Option<&'static PrecisionLevel> {
    PRECISION_LEVELS.iter().find(|level| level.digits == digits)
}

impl fmt::Display for PrecisionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} decimals ({}, {})",
            self.digits, self.accuracy, self.description
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Every field defaults, so an incomplete entry loads as an expired one.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct CacheEntry {
    /// RFC 3339. Kept as text so one bad entry does not spoil the file.
    pub timestamp: Option<String>,
    pub coordinates: Coordinates,
    pub precision: u8,
    pub location_data: Location,
}

/// `~/.geotagger/geocoding_cache.json`
pub fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CACHE_DIR).join(CACHE_FILE))
}

/// Reverse geocoding results keyed by rounded coordinates, persisted as a
/// single JSON file.
pub struct GeocodeCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
    precision: u8,
    max_age_days: u32,
}

impl GeocodeCache {
    pub fn open(path: &Path, precision: u8, max_age_days: u32) -> Result<GeocodeCache> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut cache = GeocodeCache {
            path: path.to_path_buf(),
            entries: load_entries(path),
            precision: DEFAULT_PRECISION,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        };
        if !cache.set_precision(precision) {
            warn!(
                "Unsupported cache precision {}, using {}",
                precision, DEFAULT_PRECISION
            );
        }
        cache.set_max_age_days(max_age_days);
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn max_age_days(&self) -> u32 {
        self.max_age_days
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_precision(&mut self, precision: u8) -> bool {
        if precision_level(precision).is_some() {
            self.precision = precision;
            true
        } else {
            false
        }
    }

    pub fn set_max_age_days(&mut self, days: u32) -> bool {
        if days > 0 {
            self.max_age_days = days;
            true
        } else {
            false
        }
    }

    pub fn precision_info(&self) -> &'static PrecisionLevel {
        precision_level(self.precision).unwrap_or(&PRECISION_LEVELS[2])
    }

    pub fn get(&self, lat: f64, lon: f64) -> Option<Location> {
        let key = self.key(lat, lon);
        let entry = self.entries.get(&key)?;
        if is_fresh(entry, Utc::now(), self.max_age_days) {
            Some(entry.location_data.clone())
        } else {
            debug!("Cache entry {} expired", key);
            None
        }
    }

    pub fn set(&mut self, lat: f64, lon: f64, location: &Location) -> Result<()> {
        self.insert_at(lat, lon, location, Utc::now());
        self.save()
    }

    /// Removes expired entries and entries without a readable timestamp.
    pub fn clear_old_entries(&mut self, max_age_days: Option<u32>) -> Result<usize> {
        let max_age_days = max_age_days.unwrap_or(self.max_age_days);
        let now = Utc::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| is_fresh(entry, now, max_age_days));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.save()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let valid = self
            .entries
            .values()
            .filter(|entry| is_fresh(entry, now, self.max_age_days))
            .count();
        CacheStats {
            total: self.entries.len(),
            valid,
            expired: self.entries.len() - valid,
            path: self.path.clone(),
            max_age_days: self.max_age_days,
            precision: self.precision_info(),
        }
    }

    /// Writes to a temporary file next to the cache, then renames it over.
    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &self.entries)?;
            writer.flush()?;
        }
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn insert_at(&mut self, lat: f64, lon: f64, location: &Location, at: DateTime<Utc>) {
        let key = self.key(lat, lon);
        self.entries.insert(
            key,
            CacheEntry {
                timestamp: Some(at.to_rfc3339()),
                coordinates: Coordinates {
                    lat: round_to(lat, self.precision),
                    lon: round_to(lon, self.precision),
                },
                precision: self.precision,
                location_data: location.clone(),
            },
        );
    }

    fn key(&self, lat: f64, lon: f64) -> String {
        let digits = self.precision as usize;
        let rounded = format!(
            "{:.*},{:.*}",
            digits,
            round_to(lat, self.precision),
            digits,
            round_to(lon, self.precision)
        );
        blake3::hash(rounded.as_bytes()).to_hex().to_string()
    }
}

fn load_entries(path: &Path) -> BTreeMap<String, CacheEntry> {
    if !path.exists() {
        return BTreeMap::new();
    }
    let parsed = fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|contents| {
            serde_json::from_str::<Map<String, Value>>(&contents).map_err(|e| e.to_string())
        });
    let raw = match parsed {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Could not load cache {}: {}", path.display(), e);
            return BTreeMap::new();
        }
    };
    raw.into_iter()
        .map(|(key, value)| {
            let entry = serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Unreadable cache entry {}: {}", key, e);
                CacheEntry::default()
            });
            (key, entry)
        })
        .collect()
}

fn round_to(value: f64, digits: u8) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

fn is_fresh(entry: &CacheEntry, now: DateTime<Utc>, max_age_days: u32) -> bool {
    let Some(timestamp) = entry.timestamp.as_deref() else {
        return false;
    };
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(timestamp) => {
            now.signed_duration_since(timestamp) <= Duration::days(max_age_days as i64)
        }
        Err(_) => false,
    }
}

pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
    pub path: PathBuf,
    pub max_age_days: u32,
    pub precision: &'static PrecisionLevel,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cache file:  {}", self.path.display())?;
        writeln!(f, "Entries:     {}", self.total)?;
        writeln!(f, "  valid:     {}", self.valid)?;
        writeln!(f, "  expired:   {}", self.expired)?;
        writeln!(f, "Lifetime:    {} days", self.max_age_days)?;
        write!(f, "Precision:   {}", self.precision)
    }
}
