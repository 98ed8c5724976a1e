//! Content probing: digest, MIME sniffing, and image dimensions

use std::io::Cursor;

use crate::model::{extension_of, FileMeta, ImageDimensions};

/// Fallback MIME type for content nothing recognises
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Build the metadata block for `data` uploaded as `original_filename`
pub fn probe(data: &[u8], original_filename: &str) -> FileMeta {
    let filename = original_filename.trim();

    FileMeta {
        filename: (!filename.is_empty()).then(|| filename.to_string()),
        extension: extension_of(filename),
        md5: Some(md5_hex(data)),
        mime_type: Some(sniff_mime_type(data, filename)),
        size: data.len() as i64,
        image: image_dimensions(data),
    }
}

/// Hex MD5 digest
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// MIME type from the content's magic bytes.
///
/// Content without a signature only takes a `text/*` type from the filename,
/// and only if it reads as text; anything else is `application/octet-stream`.
pub fn sniff_mime_type(data: &[u8], filename: &str) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }

    if looks_like_text(data) {
        if let Some(guess) = mime_guess::from_path(filename)
            .iter()
            .find(|m| m.type_() == mime_guess::mime::TEXT)
        {
            return guess.essence_str().to_string();
        }
    }

    OCTET_STREAM.to_string()
}

fn looks_like_text(data: &[u8]) -> bool {
    !data.contains(&0) && std::str::from_utf8(data).is_ok()
}

/// Pixel dimensions if `data` is a raster image the decoder recognises
pub fn image_dimensions(data: &[u8]) -> Option<ImageDimensions> {
    let reader = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?;

    reader.format()?;

    let (width, height) = reader.into_dimensions().ok()?;
    Some(ImageDimensions { width, height })
}
