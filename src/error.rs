//! Error type shared by the library modules.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// ExifTool could not be launched or produced unusable output.
    #[error("ExifTool error: {0}")]
    ExifTool(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Cannot walk directory: {0}")]
    Walk(#[from] globwalk::GlobError),
}
