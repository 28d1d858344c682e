//! The record returned by a successful render.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where a rendered image ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderOutput {
    pub notation: String,
    /// Cache-relative name, e.g. `sr-mup-<hex>.png`. This is what a caller
    /// embeds in a URL.
    pub file_name: String,
    /// Absolute (or cache-dir-relative) path of the PNG.
    pub path: PathBuf,
    /// `true` when no external program ran.
    pub cache_hit: bool,
    pub duration_ms: u64,
}

impl RenderOutput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pixel width and height, read from the PNG header.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        image::image_dimensions(&self.path).ok()
    }
}
