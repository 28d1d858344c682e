//! The render pipeline: one fragment in, one cached PNG out.
//!
//! ```text
//! fragment
//!  │
//!  ├─  1. Validate   non-empty, notation blacklist
//!  ├─  2. Length     configured maximum
//!  ├─  3. Cache      key lookup; a hit ends here
//!  ├─  4. convert    executable?
//!  ├─  5. Cache dir  writable?
//!  ├─  6. Temp dir   writable? (else the fallback temp dir)
//!  ├─  7. Workspace  private directory for this render
//!  ├─  8. Files      intermediate placeholder + composed input
//!  ├─  9. Stage 1    notation program → PostScript
//!  ├─ 10. Stage 2    ImageMagick → staged PNG → cache entry
//!  ├─ 11. Cleanup    workspace removed (or kept for inspection)
//!  └─ 12. Output     cache-relative file name
//! ```
//!
//! Every failure is terminal and maps to exactly one [`RenderError`]. The
//! cache lookup deliberately precedes every environment check, so a cache
//! hit works even when the programs or directories have since disappeared.

use crate::cache::{Cache, CacheKey};
use crate::config::{RenderConfig, RenderRequest};
use crate::error::RenderError;
use crate::health::is_executable;
use crate::notation::{Notation, NotationRegistry};
use crate::output::RenderOutput;
use crate::pipeline::compose::ComposeOptions;
use crate::pipeline::convert::{self, ImageEffects, Stage};
use crate::pipeline::exec::{Executor, ProcessRunner, SystemRunner};
use crate::pipeline::validate::is_blank;
use crate::pipeline::workspace::{is_writable_dir, resolve_temp_dir_with, Workspace};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Renders fragments with a fixed configuration and set of notations.
///
/// Cheap to clone; clones share configuration, registry and runner. A
/// `Renderer` holds no per-render state, so one instance may serve many
/// threads at once.
#[derive(Clone)]
pub struct Renderer {
    config: Arc<RenderConfig>,
    registry: Arc<NotationRegistry>,
    runner: Arc<dyn ProcessRunner>,
    cache: Cache,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    pub fn new(config: RenderConfig, registry: NotationRegistry) -> Self {
        let cache = Cache::new(config.cache_dir.clone(), config.cache_prefix.clone());
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            runner: Arc::new(SystemRunner),
            cache,
        }
    }

    /// Run external commands through `runner` instead of spawning them
    /// directly.
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn registry(&self) -> &NotationRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Render `request`, or find its image in the cache.
    ///
    /// # Errors
    /// Exactly one [`RenderError`] per failed step; see the module docs.
    pub fn render(&self, request: &RenderRequest) -> Result<RenderOutput, RenderError> {
        let started = Instant::now();
        let result = self.run_pipeline(request, started);

        match &result {
            Ok(output) => {
                info!(
                    "Rendered '{}' fragment as {} in {}ms{}",
                    output.notation,
                    output.file_name,
                    output.duration_ms,
                    if output.cache_hit { " (cached)" } else { "" }
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_render_complete(&output.file_name, output.duration_ms);
                }
            }
            Err(e) => {
                warn!("Rendering '{}' fragment failed [{}]: {}", request.notation, e.code(), e);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_render_error(e.code(), &e.to_string());
                }
            }
        }
        result
    }

    /// [`Renderer::render`] on tokio's blocking pool.
    ///
    /// The external programs are synchronous, so the pipeline must not run on
    /// an async worker thread.
    pub async fn render_async(&self, request: RenderRequest) -> Result<RenderOutput, RenderError> {
        let renderer = self.clone();
        let notation = request.notation.clone();
        tokio::task::spawn_blocking(move || renderer.render(&request))
            .await
            .map_err(|e| RenderError::InternalClass {
                notation,
                detail: format!("Render task panicked: {}", e),
            })?
    }

    fn run_pipeline(&self, request: &RenderRequest, started: Instant) -> Result<RenderOutput, RenderError> {
        let config = &*self.config;
        let callback = config.progress_callback.as_ref();

        let notation = self
            .registry
            .get(&request.notation)
            .ok_or_else(|| RenderError::InternalClass {
                notation: request.notation.clone(),
                detail: "no such notation is registered".into(),
            })?;
        let id = notation.id();

        // ── Step 1: Validate ─────────────────────────────────────────────
        if is_blank(&request.fragment) {
            return Err(RenderError::InvalidInput {
                notation: id.to_string(),
                reason: "fragment is empty".into(),
            });
        }
        notation
            .validate(&request.fragment)
            .map_err(|v| RenderError::InvalidInput {
                notation: id.to_string(),
                reason: v.to_string(),
            })?;

        // ── Step 2: Length limit ─────────────────────────────────────────
        let limit = config.content_max_length;
        if limit > 0 && request.fragment.len() > limit {
            return Err(RenderError::LengthExceeded {
                length: request.fragment.len(),
                limit,
            });
        }

        // ── Step 3: Cache lookup ─────────────────────────────────────────
        let key = CacheKey::derive(
            &request.fragment,
            request.invert,
            request.transparent,
            id,
            request.image_max_width,
        );
        let file_name = self.cache.file_name(&key, id);
        if let Some(cb) = callback {
            cb.on_render_start(id, key.as_str());
        }
        if let Some(path) = self.cache.lookup(&key, id) {
            if let Some(cb) = callback {
                cb.on_cache_hit(&file_name);
            }
            return Ok(RenderOutput {
                notation: id.to_string(),
                file_name,
                path,
                cache_hit: true,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        // ── Step 4: Image converter ──────────────────────────────────────
        if !is_executable(&config.convert_bin) {
            return Err(RenderError::ConvertUnusable {
                path: config.convert_bin.clone(),
            });
        }

        // ── Step 5: Cache directory ──────────────────────────────────────
        if !is_writable_dir(self.cache.dir()) {
            return Err(RenderError::CacheDirectoryNotWritable {
                path: self.cache.dir().to_path_buf(),
            });
        }

        // ── Step 6: Temp directory ───────────────────────────────────────
        let temp_dir = resolve_temp_dir_with(&config.temp_dir, &config.fallback_temp_dir)
            .ok_or_else(|| RenderError::TempDirectoryNotWritable {
                path: config.temp_dir.clone(),
            })?;

        // ── Step 7: Workspace ────────────────────────────────────────────
        let workspace = Workspace::allocate(&temp_dir, id, notation.file_extension(), config.keep_artifacts)
            .map_err(|e| {
                debug!("Workspace allocation in {} failed: {}", temp_dir.display(), e);
                RenderError::TempDirectoryNotWritable { path: temp_dir.clone() }
            })?;

        // ── Step 8: Placeholder + input document ─────────────────────────
        workspace
            .create_placeholder()
            .map_err(|source| RenderError::TempFileNotWritable {
                path: workspace.intermediate_file().to_path_buf(),
                source,
            })?;
        let document = notation.compose(&request.fragment, &ComposeOptions::new(request.image_max_width));
        workspace
            .write_input(&document)
            .map_err(|source| RenderError::TempFileNotWritable {
                path: workspace.input_file().to_path_buf(),
                source,
            })?;

        // ── Step 9: Stage 1 ──────────────────────────────────────────────
        self.check_notation_programs(notation.as_ref())?;
        let mut exec = Executor::new(self.runner.as_ref(), config.stage_timeout);

        let stage_start = Instant::now();
        if let Some(cb) = callback {
            cb.on_stage_start(Stage::Render);
        }
        convert::run_stage1(notation.as_ref(), &workspace, &config.programs, &mut exec)?;
        if let Some(cb) = callback {
            cb.on_stage_complete(Stage::Render, stage_start.elapsed().as_millis() as u64);
        }

        // ── Step 10: Stage 2 ─────────────────────────────────────────────
        let cache_unwritable = |e: std::io::Error| {
            debug!("Cache write in {} failed: {}", self.cache.dir().display(), e);
            RenderError::CacheDirectoryNotWritable {
                path: self.cache.dir().to_path_buf(),
            }
        };
        let staged = self.cache.staging_file().map_err(cache_unwritable)?;

        let stage_start = Instant::now();
        if let Some(cb) = callback {
            cb.on_stage_start(Stage::ImageConvert);
        }
        convert::run_stage2(
            &config.convert_bin,
            workspace.intermediate_file(),
            &staged,
            ImageEffects {
                invert: request.invert,
                transparent: request.transparent,
            },
            &notation.stage2_profile(),
            &mut exec,
        )?;
        let path = self
            .cache
            .materialize(staged, &key, id)
            .map_err(cache_unwritable)?;
        if let Some(cb) = callback {
            cb.on_stage_complete(Stage::ImageConvert, stage_start.elapsed().as_millis() as u64);
        }

        // ── Step 11: Cleanup ─────────────────────────────────────────────
        if let Err(e) = workspace.finish() {
            warn!("Failed to remove temporary files: {}", e);
        }

        // ── Step 12: Output ──────────────────────────────────────────────
        debug!("{} external command(s) run", exec.invocations());
        Ok(RenderOutput {
            notation: id.to_string(),
            file_name,
            path,
            cache_hit: false,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Every program the notation needs must be configured and executable
    /// before anything is spawned.
    fn check_notation_programs(&self, notation: &dyn Notation) -> Result<(), RenderError> {
        for spec in notation.required_programs() {
            let detail = match self.config.programs.get(spec.key) {
                None => format!("{} ({}) is not configured", spec.name, spec.key),
                Some(path) if !is_executable(path) => {
                    format!("{} '{}' is missing or not executable", spec.name, path.display())
                }
                Some(_) => continue,
            };
            return Err(RenderError::RenderingError {
                notation: notation.id().to_string(),
                detail,
                command_output: String::new(),
            });
        }
        Ok(())
    }
}
