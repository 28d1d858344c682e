//! Progress-callback trait for render pipeline events.
//!
//! Inject an [`Arc<dyn RenderProgressCallback>`] via
//! [`crate::config::RenderConfigBuilder::progress_callback`] to observe each
//! render as it moves through the pipeline. The CLI uses it to drive its
//! progress bar; tests use it to assert which stages ran.
//!
//! # Example
//!
//! ```rust
//! use scorerender::{RenderConfig, RenderProgressCallback};
//! use scorerender::pipeline::convert::Stage;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter {
//!     stages: AtomicUsize,
//! }
//!
//! impl RenderProgressCallback for StageCounter {
//!     fn on_stage_start(&self, stage: Stage) {
//!         self.stages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage}");
//!     }
//! }
//!
//! let counter = Arc::new(StageCounter { stages: AtomicUsize::new(0) });
//!
//! let config = RenderConfig::builder()
//!     .progress_callback(counter as Arc<dyn RenderProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::ErrorCode;
use crate::pipeline::convert::Stage;
use std::sync::Arc;

/// Called by the pipeline as a render progresses.
///
/// Implementations must be `Send + Sync`: one [`crate::Renderer`] may be
/// shared by several threads, and events from concurrent renders interleave.
/// All methods default to no-ops.
pub trait RenderProgressCallback: Send + Sync {
    /// A render passed validation and is about to look up the cache.
    fn on_render_start(&self, notation: &str, cache_key: &str) {
        let _ = (notation, cache_key);
    }

    /// The image already existed; no external program will run.
    fn on_cache_hit(&self, file_name: &str) {
        let _ = file_name;
    }

    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// A stage finished successfully.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// The render produced (or found) `file_name` in the cache directory.
    fn on_render_complete(&self, file_name: &str, elapsed_ms: u64) {
        let _ = (file_name, elapsed_ms);
    }

    /// The render failed with `code`.
    fn on_render_error(&self, code: ErrorCode, message: &str) {
        let _ = (code, message);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl RenderProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RenderConfig`].
pub type ProgressCallback = Arc<dyn RenderProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl RenderProgressCallback for Recorder {
        fn on_render_start(&self, notation: &str, _cache_key: &str) {
            self.events.lock().unwrap().push(format!("start {notation}"));
        }

        fn on_stage_start(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("begin {stage:?}"));
        }

        fn on_stage_complete(&self, stage: Stage, _elapsed_ms: u64) {
            self.events.lock().unwrap().push(format!("end {stage:?}"));
        }

        fn on_render_error(&self, code: ErrorCode, _message: &str) {
            self.events.lock().unwrap().push(format!("error {code}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_render_start("mup", "0123");
        cb.on_cache_hit("sr-mup-0123.png");
        cb.on_stage_start(Stage::Render);
        cb.on_stage_complete(Stage::Render, 12);
        cb.on_render_complete("sr-mup-0123.png", 30);
        cb.on_render_error(ErrorCode::RenderingError, "exit status 1");
    }

    #[test]
    fn recorder_sees_events_in_order() {
        let rec = Recorder::default();
        rec.on_render_start("pmw", "abcd");
        rec.on_stage_start(Stage::Render);
        rec.on_stage_complete(Stage::Render, 5);
        rec.on_stage_start(Stage::ImageConvert);
        rec.on_render_error(ErrorCode::ImageConvertFailure, "exit status 1");
        // Not overridden: must be a silent no-op.
        rec.on_cache_hit("ignored");

        assert_eq!(
            *rec.events.lock().unwrap(),
            vec![
                "start pmw",
                "begin Render",
                "end Render",
                "begin ImageConvert",
                "error IMAGE_CONVERT_FAILURE",
            ]
        );
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start(Stage::ImageConvert);
    }
}
