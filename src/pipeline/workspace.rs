//! Per-render work area inside the temporary directory.
//!
//! Every render gets its own freshly created directory (via [`tempfile`]),
//! so file names never collide between concurrent renders and auxiliary
//! files written by the external programs (`.aux`, `.log`, Mup's magic
//! file, …) stay private to the render that produced them.
//!
//! The directory is removed when the [`Workspace`] is dropped, which covers
//! every early return and every error path. Setting `keep` retains it on
//! disk for post-mortem inspection instead.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Base name shared by the input document and the intermediate file.
const STEM: &str = "fragment";

/// Extension of the intermediate page-description file.
pub const INTERMEDIATE_EXTENSION: &str = "ps";

/// Whether `path` is an existing directory we can create files in.
///
/// Probes by creating (and immediately deleting) a temporary file, which is
/// the only check that reflects ACLs, read-only mounts and quota.
pub fn is_writable_dir(path: &Path) -> bool {
    path.is_dir()
        && tempfile::Builder::new()
            .prefix(".scorerender-probe-")
            .tempfile_in(path)
            .is_ok()
}

/// Pick the directory to work in: the configured one if usable, otherwise
/// the system temporary directory. `None` when neither is writable.
pub fn resolve_temp_dir(configured: &Path) -> Option<PathBuf> {
    resolve_temp_dir_with(configured, &std::env::temp_dir())
}

/// [`resolve_temp_dir`] with an explicit second choice.
pub fn resolve_temp_dir_with(configured: &Path, fallback: &Path) -> Option<PathBuf> {
    if is_writable_dir(configured) {
        return Some(configured.to_path_buf());
    }
    warn!(
        "Temporary directory {} is not writable, falling back to {}",
        configured.display(),
        fallback.display()
    );
    if is_writable_dir(fallback) {
        Some(fallback.to_path_buf())
    } else {
        None
    }
}

/// Files owned by one in-flight render.
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    input_file: PathBuf,
    intermediate_file: PathBuf,
    keep: bool,
}

impl Workspace {
    /// Create a uniquely named directory under `temp_dir`.
    ///
    /// `extension` is the input document's extension; some programs derive
    /// their output names from it.
    pub fn allocate(temp_dir: &Path, notation: &str, extension: &str, keep: bool) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("scorerender-{notation}-"))
            .tempdir_in(temp_dir)?;
        let path = dir.path().to_path_buf();
        debug!("Allocated workspace {}", path.display());

        Ok(Self {
            input_file: path.join(format!("{STEM}.{extension}")),
            intermediate_file: path.join(format!("{STEM}.{INTERMEDIATE_EXTENSION}")),
            path,
            dir: Some(dir),
            keep,
        })
    }

    /// Create the empty intermediate file so stage 1 always has a target and
    /// a later size check is meaningful.
    pub fn create_placeholder(&self) -> io::Result<()> {
        File::create(&self.intermediate_file).map(|_| ())
    }

    /// Write the composed document to the input file.
    pub fn write_input(&self, document: &str) -> io::Result<()> {
        fs::write(&self.input_file, document)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn input_file(&self) -> &Path {
        &self.input_file
    }

    pub fn intermediate_file(&self) -> &Path {
        &self.intermediate_file
    }

    /// Size of the intermediate file; `0` when it is missing.
    pub fn intermediate_len(&self) -> u64 {
        fs::metadata(&self.intermediate_file)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Remove the work area now, reporting any failure.
    ///
    /// With `keep` set this retains the directory instead.
    pub fn finish(mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) if self.keep => {
                let kept = dir.keep();
                info!("Kept render artifacts in {}", kept.display());
                Ok(())
            }
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if self.keep {
                let kept = dir.keep();
                info!("Kept render artifacts in {}", kept.display());
            } else if let Err(e) = dir.close() {
                warn!("Failed to remove workspace {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_dir_detection() {
        let dir = TempDir::new().unwrap();
        assert!(is_writable_dir(dir.path()));
        assert!(!is_writable_dir(&dir.path().join("missing")));

        let file = dir.path().join("plain-file");
        fs::write(&file, "x").unwrap();
        assert!(!is_writable_dir(&file));
    }

    #[test]
    fn resolve_prefers_configured_dir() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_temp_dir(dir.path()), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn resolve_falls_back_to_system_temp() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert_eq!(resolve_temp_dir(&missing), Some(std::env::temp_dir()));
    }

    #[test]
    fn resolve_gives_up_when_both_are_unusable() {
        let dir = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        assert_eq!(
            resolve_temp_dir_with(&missing, second.path()),
            Some(second.path().to_path_buf())
        );
        assert_eq!(resolve_temp_dir_with(&missing, &dir.path().join("also-missing")), None);
    }

    #[test]
    fn workspace_layout_and_cleanup_on_drop() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::allocate(root.path(), "mup", "mup", false).unwrap();
        let path = ws.path().to_path_buf();
        assert!(path.starts_with(root.path()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("scorerender-mup-"));

        ws.create_placeholder().unwrap();
        ws.write_input("score\n").unwrap();
        assert_eq!(ws.intermediate_len(), 0);
        assert_eq!(fs::read_to_string(ws.input_file()).unwrap(), "score\n");
        assert_eq!(ws.intermediate_file().extension().unwrap(), "ps");

        drop(ws);
        assert!(!path.exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn two_workspaces_never_share_files() {
        let root = TempDir::new().unwrap();
        let a = Workspace::allocate(root.path(), "pmw", "pmw", false).unwrap();
        let b = Workspace::allocate(root.path(), "pmw", "pmw", false).unwrap();
        assert_ne!(a.input_file(), b.input_file());
        assert_ne!(a.intermediate_file(), b.intermediate_file());
    }

    #[test]
    fn finish_removes_or_keeps() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::allocate(root.path(), "latex", "tex", false).unwrap();
        let path = ws.path().to_path_buf();
        ws.finish().unwrap();
        assert!(!path.exists());

        let ws = Workspace::allocate(root.path(), "latex", "tex", true).unwrap();
        ws.create_placeholder().unwrap();
        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(path.join("fragment.ps").exists());
    }
}
