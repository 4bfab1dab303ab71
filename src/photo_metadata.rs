use std::{
    ffi::OsStr,
    fmt, fs,
    path::{Path, PathBuf},
    process::{Command, Output},
    str::FromStr,
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::location::Location;

pub const DEFAULT_EXIFTOOL: &str = "exiftool";

/// Extensions kamadak-exif can read without spawning ExifTool.
const NATIVE_EXIF_EXTENSIONS: [&str; 8] =
    ["jpg", "jpeg", "tif", "tiff", "png", "webp", "heic", "heif"];

/// Options appended to every write into an image file.
const IMAGE_WRITE_OPTIONS: [&str; 3] = ["-overwrite_original", "-P", "-codedcharacterset=utf8"];
const SIDECAR_WRITE_OPTIONS: [&str; 2] = ["-overwrite_original", "-P"];

/// Where resolved place names are written.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Into the image itself; an existing sidecar is updated as well.
    #[default]
    Image,
    /// Only into the XMP sidecar, which is created when missing.
    Sidecar,
}

impl FromStr for WriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<WriteMode> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(WriteMode::Image),
            "sidecar" => Ok(WriteMode::Sidecar),
            other => Err(Error::Config(format!("unknown write mode '{}'", other))),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Image => write!(f, "image"),
            WriteMode::Sidecar => write!(f, "sidecar"),
        }
    }
}

/// Place fields already present in a file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExistingLocation {
    pub city: String,
    pub state: String,
    pub country: String,
}

/// Whether writing `new` would change what is stored.
pub fn needs_update(existing: &ExistingLocation, new: &Location) -> bool {
    existing.city != new.city || existing.state != new.state || existing.country != new.country
}

/// `photo.jpg` -> `photo.jpg.xmp`
pub fn sidecar_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_os_string();
    name.push(".xmp");
    PathBuf::from(name)
}

/// The sidecar, if it exists and was modified after the image.
pub fn newer_sidecar(image: &Path) -> Option<PathBuf> {
    let sidecar = sidecar_path(image);
    let sidecar_mtime = fs::metadata(&sidecar).and_then(|m| m.modified()).ok()?;
    let image_mtime = fs::metadata(image).and_then(|m| m.modified()).ok()?;
    if sidecar_mtime > image_mtime {
        Some(sidecar)
    } else {
        None
    }
}

pub trait MetadataBackend {
    /// Signed decimal degrees, `Ok(None)` when the file carries no position.
    fn read_gps(&self, path: &Path) -> Result<Option<(f64, f64)>>;
    fn has_location(&self, path: &Path) -> Result<bool>;
    fn read_location(&self, path: &Path) -> Result<ExistingLocation>;
    fn write_location(&self, image: &Path, location: &Location, mode: WriteMode) -> Result<()>;
}

/// Tag assignments for ExifTool. Empty fields are left untouched.
pub fn location_args(location: &Location) -> Vec<String> {
    let mut args = Vec::new();
    let mut assign = |tags: &[&str], value: &str| {
        for tag in tags {
            args.push(format!("-{}={}", tag, value));
        }
    };

    if !location.country.is_empty() {
        assign(
            &[
                "IPTC:Country-PrimaryLocationName",
                "XMP:Country",
                "XMP-iptcExt:LocationShownCountryName",
            ],
            &location.country,
        );
    }
    if let Some(code) = location.country_code() {
        assign(
            &[
                "IPTC:Country-PrimaryLocationCode",
                "XMP:CountryCode",
                "XMP-iptcExt:LocationShownCountryCode",
            ],
            &code,
        );
    }
    if !location.state.is_empty() {
        assign(
            &[
                "IPTC:Province-State",
                "XMP:State",
                "XMP-iptcExt:LocationShownProvinceState",
            ],
            &location.state,
        );
    }
    if !location.county.is_empty() {
        assign(&["XMP-iptcExt:LocationShownCity"], &location.county);
    }
    if !location.city.is_empty() {
        assign(
            &["IPTC:City", "XMP:City", "XMP-photoshop:City"],
            &location.city,
        );
    }
    if let Some(sub) = location.sublocation() {
        assign(
            &[
                "IPTC:Sub-location",
                "XMP:Location",
                "XMP-iptcExt:LocationShownSublocation",
            ],
            sub,
        );
    }
    if let Some(street) = location.street_line() {
        assign(&["XMP-iptcCore:Location"], &street);
    }
    if !location.postcode.is_empty() {
        assign(&["XMP-photoshop:PostalCode"], &location.postcode);
    }
    if !location.name.is_empty() && location.city.is_empty() {
        assign(&["XMP-iptcExt:LocationShownCity"], &location.name);
    }
    args
}

/// Drops IPTC assignments, which an XMP file cannot hold.
fn xmp_only(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|arg| arg.starts_with("-XMP"))
        .cloned()
        .collect()
}

/// One ExifTool invocation: `args [-o output] file`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStep {
    pub args: Vec<String>,
    /// Set when a new file is created instead of editing `file` in place.
    pub output: Option<PathBuf>,
    pub file: PathBuf,
    /// A failed optional step is logged, not returned.
    pub required: bool,
}

/// ExifTool invocations that store `location` for `image` under `mode`.
pub fn write_plan(
    image: &Path,
    location: &Location,
    mode: WriteMode,
    sidecar_exists: bool,
) -> Vec<WriteStep> {
    let args = location_args(location);
    if args.is_empty() {
        return Vec::new();
    }
    let sidecar = sidecar_path(image);
    let update_sidecar = |required: bool| WriteStep {
        args: with_options(xmp_only(&args), &SIDECAR_WRITE_OPTIONS),
        output: None,
        file: sidecar.clone(),
        required,
    };
    match mode {
        WriteMode::Image => {
            let mut plan = vec![WriteStep {
                args: with_options(args.clone(), &IMAGE_WRITE_OPTIONS),
                output: None,
                file: image.to_path_buf(),
                required: true,
            }];
            if sidecar_exists {
                plan.push(update_sidecar(false));
            }
            plan
        }
        WriteMode::Sidecar if sidecar_exists => vec![update_sidecar(true)],
        WriteMode::Sidecar => vec![WriteStep {
            args: xmp_only(&args),
            output: Some(sidecar.clone()),
            file: image.to_path_buf(),
            required: true,
        }],
    }
}

fn with_options(mut args: Vec<String>, options: &[&str]) -> Vec<String> {
    args.extend(options.iter().map(|o| o.to_string()));
    args
}

/// Runs the `exiftool` program.
pub struct ExifTool {
    program: PathBuf,
}

impl Default for ExifTool {
    fn default() -> Self {
        ExifTool::new(DEFAULT_EXIFTOOL)
    }
}

impl ExifTool {
    pub fn new<P: AsRef<Path>>(program: P) -> ExifTool {
        ExifTool {
            program: program.as_ref().to_path_buf(),
        }
    }

    /// Fails when the program cannot be launched.
    pub fn version(&self) -> Result<String> {
        let output = self.run(["-ver"])?;
        check_status(&output)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.program).args(args).output().map_err(|e| {
            Error::ExifTool(format!("cannot run {}: {}", self.program.display(), e))
        })
    }

    /// First object of ExifTool's `-json` output, `None` when it reports failure.
    fn query(&self, args: &[&str], path: &Path) -> Result<Option<Map<String, Value>>> {
        let mut cmd_args: Vec<&OsStr> = vec![OsStr::new("-json")];
        cmd_args.extend(args.iter().map(|a| OsStr::new(*a)));
        cmd_args.push(path.as_os_str());
        let output = self.run(cmd_args)?;
        if !output.status.success() {
            debug!(
                "exiftool failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }
        let json = String::from_utf8_lossy(&output.stdout);
        let value: Value = serde_json::from_str(&json)?;
        Ok(value.get(0).and_then(|v| v.as_object()).cloned())
    }

    fn read_gps_exiftool(&self, path: &Path) -> Result<Option<(f64, f64)>> {
        let tags = [
            "-n",
            "-GPSLatitude",
            "-GPSLongitude",
            "-GPSLatitudeRef",
            "-GPSLongitudeRef",
        ];
        Ok(self
            .query(&tags, path)?
            .and_then(|fields| gps_from_exiftool_json(&fields)))
    }

    fn write(&self, step: &WriteStep) -> Result<()> {
        let mut args: Vec<&OsStr> = step.args.iter().map(|a| OsStr::new(a.as_str())).collect();
        if let Some(output) = &step.output {
            args.push(OsStr::new("-o"));
            args.push(output.as_os_str());
        }
        args.push(step.file.as_os_str());
        check_status(&self.run(args)?)
    }
}

impl MetadataBackend for ExifTool {
    fn read_gps(&self, path: &Path) -> Result<Option<(f64, f64)>> {
        let native = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| NATIVE_EXIF_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if native {
            // GPS may live only in XMP, which kamadak-exif does not read.
            match read_exif_kamadak(path) {
                Ok(Some(coords)) => return Ok(Some(coords)),
                Ok(None) => debug!("No EXIF GPS in {}, asking ExifTool", path.display()),
                Err(e) => debug!("Primary parser failed on {}: {}", path.display(), e),
            }
        }
        self.read_gps_exiftool(path)
    }

    fn has_location(&self, path: &Path) -> Result<bool> {
        let fields = self.query(&["-G", "-IPTC:City", "-XMP:City"], path)?;
        Ok(fields
            .map(|fields| !field_string(&fields, &["IPTC:City", "XMP:City"]).is_empty())
            .unwrap_or(false))
    }

    fn read_location(&self, path: &Path) -> Result<ExistingLocation> {
        let tags = [
            "-G",
            "-IPTC:City",
            "-IPTC:Province-State",
            "-IPTC:Country-PrimaryLocationName",
            "-XMP:City",
            "-XMP:State",
            "-XMP:Country",
        ];
        Ok(self
            .query(&tags, path)?
            .map(|fields| existing_from_json(&fields))
            .unwrap_or_default())
    }

    fn write_location(&self, image: &Path, location: &Location, mode: WriteMode) -> Result<()> {
        let plan = write_plan(image, location, mode, sidecar_path(image).exists());
        if plan.is_empty() {
            debug!("Nothing to write for {}", image.display());
        }
        for step in &plan {
            match self.write(step) {
                Ok(()) => {}
                Err(e) if !step.required => {
                    warn!("Could not update {}: {}", step.file.display(), e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn check_status(output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(Error::ExifTool(format!(
        "{}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    )))
}

fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty value among `keys`.
fn field_string(fields: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| fields.get(*key).and_then(value_string))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

fn existing_from_json(fields: &Map<String, Value>) -> ExistingLocation {
    ExistingLocation {
        city: field_string(fields, &["IPTC:City", "XMP:City"]),
        state: field_string(fields, &["IPTC:Province-State", "XMP:State"]),
        country: field_string(fields, &["IPTC:Country-PrimaryLocationName", "XMP:Country"]),
    }
}

fn coordinate_from_json(fields: &Map<String, Value>, key: &str, ref_key: &str) -> Option<f64> {
    let value = match fields.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let negative_ref = fields
        .get(ref_key)
        .and_then(|r| r.as_str())
        .map(|r| r.starts_with('S') || r.starts_with('W'))
        .unwrap_or(false);
    if negative_ref && value > 0.0 {
        Some(-value)
    } else {
        Some(value)
    }
}

fn gps_from_exiftool_json(fields: &Map<String, Value>) -> Option<(f64, f64)> {
    let lat = coordinate_from_json(fields, "GPSLatitude", "GPSLatitudeRef")?;
    let lon = coordinate_from_json(fields, "GPSLongitude", "GPSLongitudeRef")?;
    Some((lat, lon))
}

pub fn read_exif_kamadak(path: &Path) -> std::result::Result<Option<(f64, f64)>, exif::Error> {
    let file = fs::File::open(path).map_err(exif::Error::Io)?;
    let mut bufreader = std::io::BufReader::new(&file);
    let exif = exif::Reader::new().read_from_container(&mut bufreader)?;

    let lat = read_coordinate(&exif, exif::Tag::GPSLatitude, exif::Tag::GPSLatitudeRef);
    let lon = read_coordinate(&exif, exif::Tag::GPSLongitude, exif::Tag::GPSLongitudeRef);
    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok(Some((lat, lon))),
        _ => Ok(None),
    }
}

fn read_coordinate(exif: &exif::Exif, tag: exif::Tag, ref_tag: exif::Tag) -> Option<f64> {
    let coord_ref = match &exif.get_field(ref_tag, exif::In::PRIMARY)?.value {
        exif::Value::Ascii(parts) => parts.first()?.first().copied()?,
        _ => return None,
    };
    let dms: Vec<f64> = match &exif.get_field(tag, exif::In::PRIMARY)?.value {
        exif::Value::Rational(parts) => parts.iter().map(|r| r.to_f64()).collect(),
        exif::Value::SRational(parts) => parts.iter().map(|r| r.to_f64()).collect(),
        _ => return None,
    };
    dms_to_degrees(&dms, coord_ref)
}

/// Degrees, minutes and seconds to signed decimal degrees.
fn dms_to_degrees(dms: &[f64], coord_ref: u8) -> Option<f64> {
    let degrees = *dms.first()?;
    let minutes = dms.get(1).copied().unwrap_or(0.0);
    let seconds = dms.get(2).copied().unwrap_or(0.0);
    let value = degrees + minutes / 60.0 + seconds / 3600.0;
    if !value.is_finite() {
        return None;
    }
    let sign = if coord_ref == b'S' || coord_ref == b'W' { -1.0 } else { 1.0 };
    Some(sign * value)
}
