use std::{
    fmt,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

pub use cache::GeocodeCache;
pub use error::{Error, Result};
pub use geocode::{PhotonClient, ReverseGeocoder};
pub use location::Location;
pub use photo_metadata::{ExifTool, MetadataBackend, WriteMode};

pub mod cache;
pub mod config;
pub mod error;
pub mod geocode;
pub mod location;
pub mod logger;
pub mod photo_metadata;

use geocode::Source;
use photo_metadata::{needs_update, newer_sidecar, sidecar_path, ExistingLocation};

/// What happened to a single image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AlreadyTagged,
    NoGps,
    NoLocation,
    Unchanged,
    Written,
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunStats {
    pub found: usize,
    pub processed: usize,
    pub skipped_already_tagged: usize,
    pub skipped_no_gps: usize,
    pub no_location: usize,
    pub cache_hits: usize,
    pub api_calls: usize,
    pub written: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl RunStats {
    /// Percentage of processed images answered from the cache.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        if self.processed == 0 {
            None
        } else {
            Some(self.cache_hits as f64 / self.processed as f64 * 100.0)
        }
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Files found:              {}", self.found)?;
        writeln!(f, "Processed:                {}", self.processed)?;
        writeln!(f, "Skipped (already tagged): {}", self.skipped_already_tagged)?;
        writeln!(f, "Skipped (no GPS):         {}", self.skipped_no_gps)?;
        writeln!(f, "No location found:        {}", self.no_location)?;
        writeln!(f, "Cache hits:               {}", self.cache_hits)?;
        writeln!(f, "API calls:                {}", self.api_calls)?;
        writeln!(f, "Metadata written:         {}", self.written)?;
        writeln!(f, "Metadata unchanged:       {}", self.unchanged)?;
        write!(f, "Failed:                   {}", self.failed)?;
        if let Some(rate) = self.cache_hit_rate() {
            write!(f, "\nCache hit rate:           {:.1}%", rate)?;
        }
        Ok(())
    }
}

pub struct Tagger<'a> {
    cache: GeocodeCache,
    geocoder: &'a dyn ReverseGeocoder,
    metadata: &'a dyn MetadataBackend,
    write_mode: WriteMode,
    skip_existing: bool,
    stats: RunStats,
}

impl<'a> Tagger<'a> {
    pub fn new(
        cache: GeocodeCache,
        geocoder: &'a dyn ReverseGeocoder,
        metadata: &'a dyn MetadataBackend,
        write_mode: WriteMode,
        skip_existing: bool,
    ) -> Tagger<'a> {
        Tagger {
            cache,
            geocoder,
            metadata,
            write_mode,
            skip_existing,
            stats: RunStats::default(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    /// Tags every matching image below `dir`.
    pub fn run(&mut self, dir: &Path, extensions: &[String]) -> Result<RunStats> {
        info!("Searching for images in {}", dir.display());
        let images = visit_paths(dir, extensions)?;
        if images.is_empty() {
            info!("No images found.");
            return Ok(self.stats.clone());
        }
        self.stats.found = images.len();
        info!("Found {} image(s)", images.len());
        info!("Cache precision: {}", self.cache.precision_info());
        info!("Cache lifetime: {} days", self.cache.max_age_days());
        if self.skip_existing {
            info!("Skipping images that already carry a city");
        }

        let total = images.len();
        for (i, image) in images.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, total, image.display());
            self.process_image(image);
        }
        Ok(self.stats.clone())
    }

    /// Processes one image; errors are logged and counted, never returned.
    pub fn process_image(&mut self, image: &Path) -> Outcome {
        let outcome = match self.try_process_image(image) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("  {}: {}", image.display(), e);
                Outcome::Failed
            }
        };
        match outcome {
            Outcome::AlreadyTagged => self.stats.skipped_already_tagged += 1,
            Outcome::NoGps => self.stats.skipped_no_gps += 1,
            Outcome::NoLocation => self.stats.no_location += 1,
            Outcome::Unchanged => self.stats.unchanged += 1,
            Outcome::Written => self.stats.written += 1,
            Outcome::Failed => self.stats.failed += 1,
        }
        outcome
    }

    fn try_process_image(&mut self, image: &Path) -> Result<Outcome> {
        let target = self.existing_target(image);

        if self.skip_existing {
            if let Some(target) = &target {
                if self.metadata.has_location(target)? {
                    info!("  already tagged");
                    return Ok(Outcome::AlreadyTagged);
                }
            }
        }

        let gps_source = match newer_sidecar(image) {
            Some(sidecar) => {
                debug!("  reading GPS from newer sidecar {}", sidecar.display());
                sidecar
            }
            None => image.to_path_buf(),
        };
        let (lat, lon) = match self.metadata.read_gps(&gps_source)? {
            Some(coords) => coords,
            None => {
                info!("  no GPS data");
                return Ok(Outcome::NoGps);
            }
        };
        info!("  GPS: {:.6}, {:.6}", lat, lon);

        let resolution = match geocode::resolve(lat, lon, &mut self.cache, self.geocoder) {
            Ok(resolution) => resolution,
            Err(e) => {
                self.stats.api_calls += 1;
                return Err(e);
            }
        };
        match resolution.source {
            Source::Cache => self.stats.cache_hits += 1,
            Source::Api => self.stats.api_calls += 1,
        }
        let location = match resolution.location {
            Some(location) => location,
            None => {
                info!("  no location found");
                return Ok(Outcome::NoLocation);
            }
        };
        self.stats.processed += 1;
        info!("  {}", location.summary());

        let existing = match &target {
            Some(target) => self.metadata.read_location(target)?,
            None => ExistingLocation::default(),
        };
        if !needs_update(&existing, &location) {
            info!("  metadata already up to date");
            return Ok(Outcome::Unchanged);
        }

        self.metadata
            .write_location(image, &location, self.write_mode)?;
        info!("  metadata written");
        Ok(Outcome::Written)
    }

    /// The file that holds the place fields under the current write mode,
    /// if it exists yet.
    fn existing_target(&self, image: &Path) -> Option<PathBuf> {
        match self.write_mode {
            WriteMode::Image => Some(image.to_path_buf()),
            WriteMode::Sidecar => Some(sidecar_path(image)).filter(|s| s.exists()),
        }
    }
}

/// Files below `src_root` whose extension is in `extensions`, sorted.
pub fn visit_paths(src_root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if extensions.is_empty() {
        return Ok(Vec::new());
    }
    let pattern = format!("**/*.{{{}}}", extensions.join(","));
    let walker = globwalk::GlobWalkerBuilder::from_patterns(src_root, &[pattern.as_str()])
        .case_insensitive(true)
        .file_type(globwalk::FileType::FILE)
        .build()?;
    let mut paths: Vec<PathBuf> = walker
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.into_path()),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        collections::HashMap,
        fs,
    };

    use super::*;
    use crate::geocode::tests::FixedGeocoder;
    use tempfile::{tempdir, TempDir};

    /// In-memory stand-in for ExifTool.
    #[derive(Default)]
    struct FakeMetadata {
        gps: HashMap<PathBuf, (f64, f64)>,
        existing: RefCell<HashMap<PathBuf, ExistingLocation>>,
        writes: RefCell<Vec<(PathBuf, WriteMode)>>,
        fail_writes: bool,
    }

    impl MetadataBackend for FakeMetadata {
        fn read_gps(&self, path: &Path) -> Result<Option<(f64, f64)>> {
            Ok(self.gps.get(path).copied())
        }

        fn has_location(&self, path: &Path) -> Result<bool> {
            Ok(self
                .existing
                .borrow()
                .get(path)
                .map(|e| !e.city.is_empty())
                .unwrap_or(false))
        }

        fn read_location(&self, path: &Path) -> Result<ExistingLocation> {
            Ok(self.existing.borrow().get(path).cloned().unwrap_or_default())
        }

        fn write_location(&self, image: &Path, location: &Location, mode: WriteMode) -> Result<()> {
            if self.fail_writes {
                return Err(Error::ExifTool("write failed".into()));
            }
            let target = match mode {
                WriteMode::Image => image.to_path_buf(),
                WriteMode::Sidecar => sidecar_path(image),
            };
            self.existing.borrow_mut().insert(
                target,
                ExistingLocation {
                    city: location.city.clone(),
                    state: location.state.clone(),
                    country: location.country.clone(),
                },
            );
            self.writes.borrow_mut().push((image.to_path_buf(), mode));
            Ok(())
        }
    }

    fn lisbon() -> Location {
        Location {
            city: "Lisboa".into(),
            state: "Lisboa".into(),
            country: "Portugal".into(),
            countrycode: "pt".into(),
            ..Default::default()
        }
    }

    fn cache_in(dir: &TempDir) -> GeocodeCache {
        GeocodeCache::open(&dir.path().join("cache.json"), 5, 30).unwrap()
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn extensions(list: &[&str]) -> Vec<String> {
        list.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn visit_paths_filters_extensions_case_insensitively() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a.jpg"));
        touch(&root.join("sub/b.JPG"));
        touch(&root.join("sub/deeper/c.nef"));
        touch(&root.join("sub/c.nef.xmp"));
        touch(&root.join("notes.txt"));

        let found = visit_paths(root, &extensions(&["jpg", "nef"])).unwrap();

        assert_eq!(
            found,
            vec![
                root.join("a.jpg"),
                root.join("sub/b.JPG"),
                root.join("sub/deeper/c.nef"),
            ]
        );
        assert!(visit_paths(root, &[]).unwrap().is_empty());
    }

    #[test]
    fn run_tags_images_and_counts() {
        let dir = tempdir().unwrap();
        let photos = dir.path().join("photos");
        let first = photos.join("1.jpg");
        let second = photos.join("2.jpg");
        let no_gps = photos.join("3.jpg");
        for p in [&first, &second, &no_gps] {
            touch(p);
        }
        let mut metadata = FakeMetadata::default();
        metadata.gps.insert(first.clone(), (38.710001, -9.140001));
        metadata.gps.insert(second.clone(), (38.710002, -9.140002));
        let geocoder = FixedGeocoder::new(Some(lisbon()));

        let mut tagger = Tagger::new(cache_in(&dir), &geocoder, &metadata, WriteMode::Image, true);
        let stats = tagger.run(&photos, &extensions(&["jpg"])).unwrap();

        assert_eq!(stats.found, 3);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.skipped_no_gps, 1);
        assert_eq!(stats.api_calls, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.written, 2);
        assert_eq!(stats.cache_hit_rate(), Some(50.0));
        assert_eq!(geocoder.calls.get(), 1);
        assert_eq!(metadata.writes.borrow().len(), 2);
    }

    #[test]
    fn second_run_skips_tagged_images() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("photos/a.jpg");
        touch(&image);
        let mut metadata = FakeMetadata::default();
        metadata.gps.insert(image.clone(), (38.71, -9.14));
        let geocoder = FixedGeocoder::new(Some(lisbon()));

        let mut tagger = Tagger::new(cache_in(&dir), &geocoder, &metadata, WriteMode::Image, true);
        assert_eq!(tagger.process_image(&image), Outcome::Written);
        assert_eq!(tagger.process_image(&image), Outcome::AlreadyTagged);

        let mut no_skip =
            Tagger::new(cache_in(&dir), &geocoder, &metadata, WriteMode::Image, false);
        assert_eq!(no_skip.process_image(&image), Outcome::Unchanged);
        assert_eq!(no_skip.stats().cache_hits, 1);
        assert_eq!(geocoder.calls.get(), 1);
    }

    #[test]
    fn sidecar_mode_checks_sidecar_only() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("raw/a.nef");
        touch(&image);
        let mut metadata = FakeMetadata::default();
        metadata.gps.insert(image.clone(), (38.71, -9.14));
        // The image itself is tagged, the sidecar does not exist yet.
        metadata.existing.borrow_mut().insert(
            image.clone(),
            ExistingLocation {
                city: "Porto".into(),
                ..Default::default()
            },
        );
        let geocoder = FixedGeocoder::new(Some(lisbon()));

        let mut tagger =
            Tagger::new(cache_in(&dir), &geocoder, &metadata, WriteMode::Sidecar, true);
        assert_eq!(tagger.process_image(&image), Outcome::Written);
        assert_eq!(
            metadata.writes.borrow().as_slice(),
            &[(image.clone(), WriteMode::Sidecar)]
        );
    }

    #[test]
    fn gps_is_read_from_newer_sidecar() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("a.cr2");
        touch(&image);
        let sidecar = sidecar_path(&image);
        let file = fs::File::create(&sidecar).unwrap();
        file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(120))
            .unwrap();
        let mut metadata = FakeMetadata::default();
        metadata.gps.insert(sidecar, (38.71, -9.14));
        let geocoder = FixedGeocoder::new(Some(lisbon()));

        let mut tagger = Tagger::new(cache_in(&dir), &geocoder, &metadata, WriteMode::Image, true);
        assert_eq!(tagger.process_image(&image), Outcome::Written);
    }

    #[test]
    fn failures_are_counted_not_returned() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("a.jpg");
        touch(&image);
        let mut metadata = FakeMetadata::default();
        metadata.gps.insert(image.clone(), (38.71, -9.14));
        metadata.fail_writes = true;
        let geocoder = FixedGeocoder::new(Some(lisbon()));
        let missing = FixedGeocoder::new(None);

        let mut tagger = Tagger::new(cache_in(&dir), &geocoder, &metadata, WriteMode::Image, true);
        assert_eq!(tagger.process_image(&image), Outcome::Failed);
        assert_eq!(tagger.stats().failed, 1);
        assert_eq!(tagger.stats().processed, 1);

        let other_dir = tempdir().unwrap();
        let mut tagger =
            Tagger::new(cache_in(&other_dir), &missing, &metadata, WriteMode::Image, true);
        assert_eq!(tagger.process_image(&image), Outcome::NoLocation);
        assert_eq!(tagger.stats().no_location, 1);
        assert_eq!(tagger.stats().processed, 0);
        assert_eq!(tagger.stats().api_calls, 1);
    }

    #[test]
    fn unanswered_and_failed_requests_count_as_api_calls() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("a.jpg");
        touch(&image);
        let mut metadata = FakeMetadata::default();
        metadata.gps.insert(image.clone(), (38.71, -9.14));
        let mut offline = FixedGeocoder::new(Some(lisbon()));
        offline.fail = true;

        let mut tagger = Tagger::new(cache_in(&dir), &offline, &metadata, WriteMode::Image, true);
        assert_eq!(tagger.process_image(&image), Outcome::Failed);
        assert_eq!(tagger.process_image(&image), Outcome::Failed);

        assert_eq!(offline.calls.get(), 2);
        assert_eq!(tagger.stats().api_calls, 2);
        assert_eq!(tagger.stats().failed, 2);
        assert_eq!(tagger.stats().cache_hits, 0);
    }

    #[test]
    fn stats_display_includes_hit_rate_only_when_processed() {
        let stats = RunStats::default();
        assert!(!stats.to_string().contains("hit rate"));

        let stats = RunStats {
            processed: 4,
            cache_hits: 1,
            ..Default::default()
        };
        assert!(stats.to_string().contains("Cache hit rate:           25.0%"));
    }
}
