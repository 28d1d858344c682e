//! Building blocks of the render pipeline.
//!
//! Each submodule implements one concern. [`crate::render::Renderer`]
//! strings them together; notations plug into them through
//! [`crate::notation::Notation`].
//!
//! ## Data Flow
//!
//! ```text
//! validate ──▶ compose ──▶ workspace ──▶ convert (stage 1 ─▶ stage 2)
//! (blacklist)  (header)    (temp files)       │ via exec
//! ```
//!
//! 1. [`validate`]  - pure accept/reject of the raw fragment
//! 2. [`compose`]   - shared helpers for turning a fragment into a document
//! 3. [`workspace`] - temp-dir resolution and the per-render work area
//! 4. [`exec`]      - run command lines and capture their output
//! 5. [`convert`]   - stage-1 success rules and the stage-2 ImageMagick call

pub mod compose;
pub mod convert;
pub mod exec;
pub mod validate;
pub mod workspace;
