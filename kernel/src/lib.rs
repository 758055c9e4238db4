#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Route of the single conversion endpoint.
pub const UPLOAD_ROUTE: &str = "/upload-and-convert";

/// Multipart field carrying the images.
pub const FILES_FIELD: &str = "files";

/// Multipart field carrying the requested target format.
pub const TARGET_FORMAT_FIELD: &str = "target_format";

/// Name under which a multi-file result is downloaded.
pub const ARCHIVE_FILE_NAME: &str = "converted_images.zip";

/// Upper bound of a single uploaded file, in bytes (10 MiB).
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Number of uploaded files considered per request. The rest is ignored.
pub const MAX_FILES_PER_REQUEST: usize = 50;

/// Extensions (lowercase, without the dot) accepted for upload.
pub const ALLOWED_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "tiff", "webp", "heic"];

/// Returns the lowercased extension of `file_name` (without the dot) if it
/// belongs to [`ALLOWED_EXTENSIONS`].
#[must_use]
pub fn allowed_extension(file_name: &str) -> Option<String> {
    let ext = extension_of(file_name)?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Extension of a file name, the part after the last dot of the base name.
/// Dot files like `.png` have no extension.
#[must_use]
pub fn extension_of(file_name: &str) -> Option<&str> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Per request limits applied by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_file_size: u64,
    pub max_files: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            max_files: MAX_FILES_PER_REQUEST,
        }
    }
}

/// Output format requested by a client.
///
/// Tokens are case-insensitive. Known formats are normalized (`jpg` and
/// `jpeg` are the same target); anything else is kept lowercased in
/// [`TargetFormat::Other`] and left to the codec to accept or reject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Jpeg,
    Png,
    WebP,
    Bmp,
    Tiff,
    Pdf,
    Other(String),
}

impl TargetFormat {
    /// Parses a format token. Blank tokens and tokens that are not plain
    /// ASCII alphanumerics yield `None`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim().to_ascii_lowercase();
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        let format = match token.as_str() {
            "jpeg" | "jpg" => TargetFormat::Jpeg,
            "png" => TargetFormat::Png,
            "webp" => TargetFormat::WebP,
            "bmp" => TargetFormat::Bmp,
            "tiff" => TargetFormat::Tiff,
            "pdf" => TargetFormat::Pdf,
            _ => TargetFormat::Other(token),
        };
        Some(format)
    }

    /// Canonical file extension including the leading dot.
    #[must_use]
    pub fn extension(&self) -> String {
        format!(".{}", self.token())
    }

    /// Canonical lowercase token (`jpg` for the JPEG family).
    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            TargetFormat::Jpeg => "jpg",
            TargetFormat::Png => "png",
            TargetFormat::WebP => "webp",
            TargetFormat::Bmp => "bmp",
            TargetFormat::Tiff => "tiff",
            TargetFormat::Pdf => "pdf",
            TargetFormat::Other(token) => token,
        }
    }

    /// Whether the target cannot store an alpha channel or a palette, so
    /// images have to be flattened to plain RGB before encoding.
    #[must_use]
    pub fn requires_flattening(&self) -> bool {
        matches!(self, TargetFormat::Jpeg | TargetFormat::Pdf)
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TargetFormat::Jpeg => write!(f, "jpeg"),
            other => write!(f, "{}", other.token()),
        }
    }
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetFormat::parse(s).ok_or_else(|| format!("invalid target format '{s}'"))
    }
}

/// Error payload returned by the service for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Human readable description of what went wrong
    pub detail: String,
}

/// Multipart form accepted by the conversion endpoint.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    /// One or more images. Only the first 50 are processed.
    #[schema(value_type = Vec<String>, format = Binary)]
    files: Vec<Vec<u8>>,
    /// Target format token, for example `png`, `jpg` or `pdf`
    target_format: String,
}
