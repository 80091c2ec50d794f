//! Image source resolution.
//!
//! A request fragment names its image through one of three mutually exclusive
//! fields, consulted in strict priority order:
//!
//! 1. `image_path`: absolute filesystem path, read directly.
//! 2. `image_filename`: a name joined under the session's `input/` directory.
//! 3. `image`: an inline base64 payload, optionally data-URI prefixed.
//!
//! Supplying more than one is not an error (the first populated field wins);
//! supplying none is. The resolver records which variant was used so calls
//! using the inline payload can be reported as degraded.

use crate::error::{AoiError, AppResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::RgbImage;
use serde::Deserialize;
use std::path::Path;

/// The three image-source fields of a request fragment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageSource {
    pub image_path: Option<String>,
    pub image_filename: Option<String>,
    pub image: Option<String>,
}

/// Which variant produced the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    AbsolutePath,
    SessionFile,
    InlineBase64,
}

impl SourceKind {
    /// Inline payloads bloat the RPC body and bypass the shared-filesystem
    /// contract; they are accepted but flagged.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::InlineBase64)
    }
}

/// A decoded frame plus observability fields.
pub struct ResolvedFrame {
    pub image: RgbImage,
    pub kind: SourceKind,
    /// The path or payload description the frame came from, for logging.
    pub origin: String,
}

/// Resolves a request fragment into a decoded frame.
pub fn resolve_image_source(
    source: &ImageSource,
    session_input_dir: &Path,
) -> AppResult<ResolvedFrame> {
    if let Some(path) = source.image_path.as_deref().filter(|p| !p.is_empty()) {
        return decode_file(Path::new(path), SourceKind::AbsolutePath);
    }
    if let Some(name) = source.image_filename.as_deref().filter(|n| !n.is_empty()) {
        // The session-relative variant's contract is "a name under input/".
        if name.contains("..") || name.starts_with('/') {
            return Err(AoiError::SourceNotFound(format!(
                "image_filename '{name}' escapes the session input directory"
            )));
        }
        return decode_file(&session_input_dir.join(name), SourceKind::SessionFile);
    }
    if let Some(payload) = source.image.as_deref().filter(|p| !p.is_empty()) {
        return decode_inline(payload);
    }
    Err(AoiError::SourceMissing)
}

fn decode_file(path: &Path, kind: SourceKind) -> AppResult<ResolvedFrame> {
    if !path.is_file() {
        return Err(AoiError::SourceNotFound(path.display().to_string()));
    }
    let image = image::open(path)
        .map_err(|err| AoiError::SourceUnreadable(format!("{}: {err}", path.display())))?
        .to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(AoiError::SourceUnreadable(format!(
            "{}: decoded to zero pixels",
            path.display()
        )));
    }
    Ok(ResolvedFrame {
        image,
        kind,
        origin: path.display().to_string(),
    })
}

fn decode_inline(payload: &str) -> AppResult<ResolvedFrame> {
    // Tolerate a data-URI wrapper: "data:image/jpeg;base64,<payload>".
    let encoded = match payload.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => payload,
    };
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|err| AoiError::SourceMalformed(format!("base64: {err}")))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|err| AoiError::SourceMalformed(format!("image decode: {err}")))?
        .to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(AoiError::SourceMalformed("decoded to zero pixels".to_string()));
    }
    Ok(ResolvedFrame {
        image,
        kind: SourceKind::InlineBase64,
        origin: format!("inline base64 ({} bytes)", bytes.len()),
    })
}
