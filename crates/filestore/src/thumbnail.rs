//! Thumbnail scaling and re-encoding

use std::io::Cursor;
use std::str::FromStr;

use image::{imageops::FilterType, DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::error::{FileStoreError, FileStoreResult};
use crate::model::ImageDimensions;

/// Output formats a thumbnail can be encoded to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailFormat {
    Png,
    Jpeg,
    Gif,
}

impl ThumbnailFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Gif => ImageFormat::Gif,
        }
    }
}

impl FromStr for ThumbnailFormat {
    type Err = FileStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "gif" => Ok(Self::Gif),
            other => Err(FileStoreError::UnsupportedFormat(format!(
                "cannot encode thumbnails as {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ThumbnailFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Bounding box and format of a thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailSpec {
    pub max_width: u32,
    pub max_height: u32,
    pub format: ThumbnailFormat,
}

impl ThumbnailSpec {
    pub fn new(max_width: u32, max_height: u32, format: ThumbnailFormat) -> Self {
        Self {
            max_width,
            max_height,
            format,
        }
    }
}

/// Fit `width x height` inside `max_width x max_height`, keeping the aspect ratio.
///
/// Images already inside the box keep their size. Otherwise the binding side
/// is set to its maximum and the other side is scaled and rounded half-up.
pub fn scaled_size(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let x_ratio = max_width as f64 / width as f64;
    let y_ratio = max_height as f64 / height as f64;

    if x_ratio * (height as f64) < max_height as f64 {
        (max_width, round_half_up(x_ratio * height as f64))
    } else {
        (round_half_up(y_ratio * width as f64), max_height)
    }
}

fn round_half_up(value: f64) -> u32 {
    (value.round() as u32).max(1)
}

/// Decode `data`, shrink it into `spec`'s box and encode it in `spec.format`
pub fn render(data: &[u8], spec: &ThumbnailSpec) -> FileStoreResult<(Vec<u8>, ImageDimensions)> {
    if spec.max_width == 0 || spec.max_height == 0 {
        return Err(FileStoreError::UnsupportedFormat(
            "thumbnail bounds must be positive".to_string(),
        ));
    }

    let img = image::load_from_memory(data)
        .map_err(|e| FileStoreError::UnsupportedFormat(format!("cannot decode source: {}", e)))?;

    let (width, height) = scaled_size(img.width(), img.height(), spec.max_width, spec.max_height);
    let resized = if (width, height) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(width, height, FilterType::Triangle)
    };

    // JPEG has no alpha channel
    let resized = match spec.format {
        ThumbnailFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
        _ => resized,
    };

    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, spec.format.image_format())
        .map_err(|e| {
            FileStoreError::UnsupportedFormat(format!("cannot encode {}: {}", spec.format, e))
        })?;

    Ok((out.into_inner(), ImageDimensions { width, height }))
}

/// Filename for a thumbnail of `original`, e.g. `photo.jpg` -> `photo.png`
pub fn thumbnail_filename(original: &str, format: ThumbnailFormat) -> String {
    let stem = std::path::Path::new(original)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("thumbnail");
    format!("{}.{}", stem, format.extension())
}
