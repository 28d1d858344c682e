//! # scorerender
//!
//! Render untrusted music-notation and math fragments to PNG images through
//! external programs, caching the result so identical input never runs the
//! programs twice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! fragment
//!  │
//!  ├─ 1. Validate  empty check + per-notation blacklist
//!  ├─ 2. Cache     content-addressed lookup (hit → done)
//!  ├─ 3. Stage 1   lilypond / mup / pmw / latex+dvips  → PostScript
//!  ├─ 4. Stage 2   ImageMagick convert → trimmed PNG
//!  └─ 5. Output    <prefix>-<notation>-<hash>.png in the cache directory
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scorerender::{NotationRegistry, RenderConfig, Renderer};
//!
//! let config = RenderConfig::builder()
//!     .cache_dir("/var/cache/scores")
//!     .program("MUP_BIN", "/usr/bin/mup")
//!     .build()?;
//! let renderer = Renderer::new(config, NotationRegistry::with_builtin());
//!
//! let request = renderer.config().request("mup", "music\n1: c;d;e;f;\nbar\n");
//! match renderer.render(&request) {
//!     Ok(out) => println!("<img src=\"/cache/{}\">", out.file_name),
//!     Err(e) => eprintln!("[{}] {}", e.code(), e),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scorerender` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ## Security
//!
//! The blacklists reject the obvious file-inclusion and shell-escape
//! constructs, but they are filters, not a sandbox. Run the external programs
//! under an account with no access to anything worth reading.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod notation;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod render;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{Cache, CacheKey};
pub use config::{ProgramPaths, RenderConfig, RenderConfigBuilder, RenderRequest};
pub use error::{ConfigError, ErrorCategory, ErrorCode, RegistryError, RenderError};
pub use notation::{Notation, NotationRegistry, ProgramSpec, Stage1Job};
pub use output::RenderOutput;
pub use progress::{NoopProgressCallback, ProgressCallback, RenderProgressCallback};
pub use render::Renderer;
