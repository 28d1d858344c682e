//! Configuration for the render pipeline.
//!
//! Everything the pipeline needs to know about its environment lives in a
//! [`RenderConfig`] value that is passed in explicitly, built via
//! [`RenderConfig::builder`]. Per-fragment options live in a
//! [`RenderRequest`], seeded from the configured defaults.

use crate::error::ConfigError;
use crate::progress::ProgressCallback;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Setting key → executable (or data file) path, e.g. `LILYPOND_BIN`.
pub type ProgramPaths = BTreeMap<String, PathBuf>;

pub const DEFAULT_IMAGE_MAX_WIDTH: u32 = 360;
pub const DEFAULT_CACHE_PREFIX: &str = "sr";

static RE_CACHE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// Environment and defaults for rendering.
///
/// # Example
/// ```rust
/// use scorerender::RenderConfig;
///
/// let config = RenderConfig::builder()
///     .cache_dir("/var/cache/scores")
///     .convert_bin("/usr/bin/convert")
///     .program("LILYPOND_BIN", "/usr/bin/lilypond")
///     .image_max_width(480)
///     .build()
///     .unwrap();
/// assert!(config.transparent);
/// ```
#[derive(Clone)]
pub struct RenderConfig {
    /// Where per-render work areas are created. Default: the system temp dir.
    ///
    /// When not writable, [`RenderConfig::fallback_temp_dir`] is tried instead.
    pub temp_dir: PathBuf,

    /// Second choice for work areas. Default: the system temp dir.
    pub fallback_temp_dir: PathBuf,

    /// Where finished PNGs are stored. Must exist; never created.
    /// Default: the system temp dir.
    pub cache_dir: PathBuf,

    /// ImageMagick `convert`. Default: `/usr/bin/convert`.
    pub convert_bin: PathBuf,

    /// Paths of the notation programs, keyed by setting name.
    pub programs: ProgramPaths,

    /// Default maximum image width in pixels. Default: 360.
    pub image_max_width: u32,

    /// Default for white-on-black output. Default: false.
    pub invert: bool,

    /// Default for a transparent background. Default: true.
    pub transparent: bool,

    /// Longest accepted fragment in bytes; `0` means unlimited. Default: 0.
    pub content_max_length: usize,

    /// First component of every cache file name. Default: `sr`.
    pub cache_prefix: String,

    /// Keep each render's work area on disk instead of deleting it.
    /// Default: false.
    pub keep_artifacts: bool,

    /// Kill an external command that runs longer than this. Default: none,
    /// a hung program blocks its render indefinitely.
    pub stage_timeout: Option<Duration>,

    /// Receives pipeline events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            fallback_temp_dir: std::env::temp_dir(),
            cache_dir: std::env::temp_dir(),
            convert_bin: PathBuf::from("/usr/bin/convert"),
            programs: ProgramPaths::new(),
            image_max_width: DEFAULT_IMAGE_MAX_WIDTH,
            invert: false,
            transparent: true,
            content_max_length: 0,
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            keep_artifacts: false,
            stage_timeout: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderConfig")
            .field("temp_dir", &self.temp_dir)
            .field("fallback_temp_dir", &self.fallback_temp_dir)
            .field("cache_dir", &self.cache_dir)
            .field("convert_bin", &self.convert_bin)
            .field("programs", &self.programs)
            .field("image_max_width", &self.image_max_width)
            .field("invert", &self.invert)
            .field("transparent", &self.transparent)
            .field("content_max_length", &self.content_max_length)
            .field("cache_prefix", &self.cache_prefix)
            .field("keep_artifacts", &self.keep_artifacts)
            .field("stage_timeout", &self.stage_timeout)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RenderProgressCallback>"),
            )
            .finish()
    }
}

impl RenderConfig {
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder {
            config: Self::default(),
        }
    }

    /// A request for `fragment` carrying this configuration's defaults.
    pub fn request(&self, notation: impl Into<String>, fragment: impl Into<String>) -> RenderRequest {
        RenderRequest {
            notation: notation.into(),
            fragment: fragment.into(),
            invert: self.invert,
            transparent: self.transparent,
            image_max_width: self.image_max_width,
        }
    }
}

/// Builder for [`RenderConfig`].
#[derive(Debug)]
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    pub fn fallback_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.fallback_temp_dir = dir.into();
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn convert_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.convert_bin = path.into();
        self
    }

    /// Set one program path, e.g. `.program("MUP_BIN", "/usr/bin/mup")`.
    pub fn program(mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.config.programs.insert(key.into(), path.into());
        self
    }

    /// Merge a whole map of program paths.
    pub fn programs(mut self, programs: ProgramPaths) -> Self {
        self.config.programs.extend(programs);
        self
    }

    pub fn image_max_width(mut self, px: u32) -> Self {
        self.config.image_max_width = px;
        self
    }

    pub fn invert(mut self, v: bool) -> Self {
        self.config.invert = v;
        self
    }

    pub fn transparent(mut self, v: bool) -> Self {
        self.config.transparent = v;
        self
    }

    pub fn content_max_length(mut self, bytes: usize) -> Self {
        self.config.content_max_length = bytes;
        self
    }

    pub fn cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.cache_prefix = prefix.into();
        self
    }

    pub fn keep_artifacts(mut self, v: bool) -> Self {
        self.config.keep_artifacts = v;
        self
    }

    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.config.stage_timeout = Some(timeout);
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RenderConfig, ConfigError> {
        let c = &self.config;
        if !RE_CACHE_PREFIX.is_match(&c.cache_prefix) {
            return Err(ConfigError::InvalidCachePrefix(c.cache_prefix.clone()));
        }
        if c.image_max_width == 0 {
            return Err(ConfigError::ZeroImageWidth);
        }
        if c.stage_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(self.config)
    }
}

/// One fragment to render, with its per-request options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub notation: String,
    /// The raw fragment as submitted; never modified by the pipeline.
    pub fragment: String,
    pub invert: bool,
    pub transparent: bool,
    pub image_max_width: u32,
}

impl RenderRequest {
    /// A request with the built-in defaults (360 px, transparent, not inverted).
    pub fn new(notation: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            notation: notation.into(),
            fragment: fragment.into(),
            invert: false,
            transparent: true,
            image_max_width: DEFAULT_IMAGE_MAX_WIDTH,
        }
    }

    pub fn invert(mut self, v: bool) -> Self {
        self.invert = v;
        self
    }

    pub fn transparent(mut self, v: bool) -> Self {
        self.transparent = v;
        self
    }

    pub fn image_max_width(mut self, px: u32) -> Self {
        self.image_max_width = px.max(1);
        self
    }
}
