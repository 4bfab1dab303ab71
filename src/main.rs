use std::{
    path::{Path, PathBuf},
    process,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use geotagger::{
    cache::{self, GeocodeCache},
    config::{self, Config},
    logger, ExifTool, PhotonClient, Tagger, WriteMode,
};

/// Write place names resolved from GPS coordinates into photo metadata
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// More output (-vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Settings file [default: ~/.geotagger/settings.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Cache file [default: ~/.geotagger/geocoding_cache.json]
    #[arg(long, global = true)]
    cache_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tag all images below a directory
    Tag {
        /// Directory/folder to process [default: last used, then .]
        dir: Option<PathBuf>,
        /// Decimal digits coordinates are rounded to for caching (3-7)
        #[arg(long, value_parser = parse_precision)]
        precision: Option<u8>,
        /// Days before a cached answer expires (1-365)
        #[arg(long, value_parser = parse_max_age)]
        max_age_days: Option<u32>,
        /// ExifTool executable
        #[arg(long)]
        exiftool: Option<String>,
        /// Language of place names
        #[arg(long)]
        lang: Option<String>,
        /// Write into XMP sidecars instead of the images
        #[arg(long, action)]
        sidecar: bool,
        /// Also process images that already carry a city
        #[arg(long, action, conflicts_with = "skip_existing")]
        no_skip_existing: bool,
        /// Skip images that already carry a city
        #[arg(long, action)]
        skip_existing: bool,
    },
    /// Inspect or clean the geocoding cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print entry counts and settings
    Stats,
    /// Remove expired entries
    Prune {
        #[arg(long, value_parser = parse_max_age)]
        max_age_days: Option<u32>,
    },
    /// Remove all entries
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current settings
    Show,
    /// Print the settings file location
    Path,
    /// Change one setting
    Set { key: String, value: String },
}

fn parse_precision(value: &str) -> std::result::Result<u8, String> {
    config::parse_precision(value).map_err(|e| e.to_string())
}

fn parse_max_age(value: &str) -> std::result::Result<u32, String> {
    config::parse_max_age(value).map_err(|e| e.to_string())
}

fn main() {
    let args = Cli::parse();

    if let Err(e) = logger::init_logger(logger::level_for(args.verbose, args.quiet)) {
        eprintln!("geotagger: {}", e);
    }

    if let Err(e) = run(args) {
        eprintln!("geotagger error: {:#}", e);
        process::exit(1);
    }
}

fn run(args: Cli) -> Result<()> {
    let config_path = match args.config {
        Some(path) => path,
        None => config::default_path().context("Cannot determine home directory")?,
    };
    let mut config = if config_path.exists() {
        config::load_from_path(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?
    } else {
        Config::default()
    };
    let cache_path = match args.cache_file {
        Some(path) => path,
        None => cache::default_path().context("Cannot determine home directory")?,
    };

    match args.command {
        Command::Tag {
            dir,
            precision,
            max_age_days,
            exiftool,
            lang,
            sidecar,
            no_skip_existing,
            skip_existing,
        } => {
            // Flags apply to this run only; only the directory is remembered.
            let mut settings = config.clone();
            if let Some(precision) = precision {
                settings.cache_precision = precision;
            }
            if let Some(days) = max_age_days {
                settings.cache_max_age_days = days;
            }
            if let Some(exiftool) = exiftool {
                settings.exiftool_path = exiftool;
            }
            if let Some(lang) = lang {
                settings.language = lang;
            }
            if sidecar {
                settings.write_mode = WriteMode::Sidecar;
            }
            if no_skip_existing {
                settings.skip_if_exists = false;
            } else if skip_existing {
                settings.skip_if_exists = true;
            }
            let dir = dir
                .or_else(|| config.last_directory.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            tag(&settings, &cache_path, &dir)?;

            config.last_directory = Some(dir.canonicalize().unwrap_or(dir));
            if let Err(e) = config::save_to_path(&config, &config_path) {
                log::warn!("Could not save settings {}: {}", config_path.display(), e);
            }
            Ok(())
        }
        Command::Cache { action } => {
            let mut cache = open_cache(&config, &cache_path)?;
            match action {
                CacheAction::Stats => println!("{}", cache.stats()),
                CacheAction::Prune { max_age_days } => {
                    let removed = cache.clear_old_entries(max_age_days)?;
                    println!("Removed {} expired entries", removed);
                }
                CacheAction::Clear => {
                    let count = cache.len();
                    cache.clear()?;
                    println!("Removed {} entries", count);
                }
            }
            Ok(())
        }
        Command::Config { action } => {
            match action {
                ConfigAction::Show => print!("{}", toml::to_string_pretty(&config)?),
                ConfigAction::Path => println!("{}", config_path.display()),
                ConfigAction::Set { key, value } => {
                    config.set(&key, &value)?;
                    config::save_to_path(&config, &config_path)?;
                    println!("{} = {}", key, value);
                }
            }
            Ok(())
        }
    }
}

fn open_cache(config: &Config, cache_path: &Path) -> Result<GeocodeCache> {
    GeocodeCache::open(cache_path, config.cache_precision, config.cache_max_age_days)
        .with_context(|| format!("Failed to open cache {}", cache_path.display()))
}

fn tag(config: &Config, cache_path: &Path, dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let exiftool = ExifTool::new(&config.exiftool_path);
    let version = exiftool.version().with_context(|| {
        format!(
            "ExifTool not found at '{}' (install it or set exiftool_path)",
            config.exiftool_path
        )
    })?;
    log::debug!("Using ExifTool {}", version);

    let geocoder = PhotonClient::with_language(&config.language, &config.user_agent)
        .context("Failed to create HTTP client")?;
    let cache = open_cache(config, cache_path)?;
    let mut tagger = Tagger::new(
        cache,
        &geocoder,
        &exiftool,
        config.write_mode,
        config.skip_if_exists,
    );
    let stats = tagger.run(dir, &config.extensions())?;

    println!("{}", "=".repeat(50));
    println!("{}", stats);
    println!("{}", "=".repeat(50));
    Ok(())
}
