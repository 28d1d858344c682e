//! Content-addressed store of rendered images.
//!
//! An entry is a PNG named `<prefix>-<notation>-<hex>.png` in the cache
//! directory, where `<hex>` is the [`CacheKey`]. Entries are immutable once
//! written: lookup is a plain existence check and there is no invalidation,
//! expiry or negative caching. Removing stale entries is left to external
//! housekeeping, which can recognise them with [`Cache::is_entry_name`].
//!
//! Writers never expose partial files. Stage 2 writes into a staging file in
//! the cache directory that [`Cache::materialize`] renames into place. Two
//! concurrent renders of the same key both do the work and the last rename
//! wins; both produce identical bytes.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::debug;

/// Number of hex characters kept from the digest (128 bits).
pub const KEY_HEX_LEN: usize = 32;

/// `<notation>-<hex>.png`, the part of an entry name after the prefix.
static RE_ENTRY_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-\w+-[0-9a-f]{32}\.png$").unwrap());

/// Deterministic identifier of one rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash everything that influences the output image.
    ///
    /// Each field is length-prefixed so adjacent fields cannot run together
    /// (`"ab" + "c"` and `"a" + "bc"` hash differently).
    pub fn derive(
        fragment: &str,
        invert: bool,
        transparent: bool,
        notation: &str,
        image_max_width: u32,
    ) -> Self {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, fragment.as_bytes());
        update_field(&mut hasher, &[u8::from(invert)]);
        update_field(&mut hasher, &[u8::from(transparent)]);
        update_field(&mut hasher, notation.as_bytes());
        update_field(&mut hasher, &image_max_width.to_le_bytes());
        let digest = hasher.finalize();
        CacheKey(hex::encode(&digest[..KEY_HEX_LEN / 2]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// The cache directory plus its naming scheme.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    prefix: String,
}

impl Cache {
    /// `prefix` must already be a valid word (the config builder checks).
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Cache-relative file name for a key.
    pub fn file_name(&self, key: &CacheKey, notation: &str) -> String {
        format!("{}-{}-{}.png", self.prefix, notation, key)
    }

    pub fn entry_path(&self, key: &CacheKey, notation: &str) -> PathBuf {
        self.dir.join(self.file_name(key, notation))
    }

    /// Existing entry for `key`, if any.
    pub fn lookup(&self, key: &CacheKey, notation: &str) -> Option<PathBuf> {
        let path = self.entry_path(key, notation);
        if path.is_file() {
            debug!("Cache hit: {}", path.display());
            Some(path)
        } else {
            debug!("Cache miss: {}", path.display());
            None
        }
    }

    /// Reserve a uniquely named file in the cache directory for stage 2.
    ///
    /// The file is deleted when the returned path is dropped, unless it is
    /// handed to [`Cache::materialize`].
    pub fn staging_file(&self) -> io::Result<TempPath> {
        let file = tempfile::Builder::new()
            .prefix(&format!(".{}-staging-", self.prefix))
            .suffix(".png")
            .tempfile_in(&self.dir)?;
        Ok(file.into_temp_path())
    }

    /// Atomically move a finished staging file to its entry name.
    pub fn materialize(&self, staged: TempPath, key: &CacheKey, notation: &str) -> io::Result<PathBuf> {
        let dest = self.entry_path(key, notation);
        staged.persist(&dest).map_err(|e| e.error)?;
        debug!("Stored cache entry {}", dest.display());
        Ok(dest)
    }

    /// Whether `name` looks like an entry this cache would write.
    pub fn is_entry_name(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix.as_str())
            .is_some_and(|tail| RE_ENTRY_TAIL.is_match(tail))
    }

    /// All entries currently in the cache directory, sorted by name.
    pub fn entries(&self) -> io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_str().is_some_and(|n| self.is_entry_name(n)) && entry.path().is_file() {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn key_is_deterministic_and_32_hex() {
        let a = CacheKey::derive("C D E F", false, true, "X", 360);
        let b = CacheKey::derive("C D E F", false, true, "X", 360);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn key_changes_with_every_input() {
        let base = CacheKey::derive("C D E F", false, true, "X", 360);
        assert_ne!(base, CacheKey::derive("C D E G", false, true, "X", 360));
        assert_ne!(base, CacheKey::derive("C D E F", true, true, "X", 360));
        assert_ne!(base, CacheKey::derive("C D E F", false, false, "X", 360));
        assert_ne!(base, CacheKey::derive("C D E F", false, true, "Y", 360));
        assert_ne!(base, CacheKey::derive("C D E F", false, true, "X", 400));
    }

    #[test]
    fn key_fields_do_not_run_together() {
        assert_ne!(
            CacheKey::derive("ab", false, false, "c", 1),
            CacheKey::derive("a", false, false, "bc", 1)
        );
    }

    #[test]
    fn file_names_and_entry_recognition() {
        let cache = Cache::new("/cache", "sr");
        let key = CacheKey::derive("c d e", false, true, "lilypond", 360);
        let name = cache.file_name(&key, "lilypond");
        assert_eq!(name, format!("sr-lilypond-{key}.png"));
        assert!(cache.is_entry_name(&name));

        assert!(!cache.is_entry_name("sr-lilypond-abc.png"));
        assert!(!cache.is_entry_name(&format!("xx-lilypond-{key}.png")));
        assert!(!cache.is_entry_name(&format!("sr-lily pond-{key}.png")));
        assert!(!cache.is_entry_name(&format!(".sr-staging-{key}.png")));
    }

    #[test]
    fn lookup_materialize_and_list() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path(), "sr");
        let key = CacheKey::derive("1: c;d;e;f;", false, true, "mup", 360);
        assert!(cache.lookup(&key, "mup").is_none());

        let staged = cache.staging_file().unwrap();
        assert!(staged.starts_with(dir.path()));
        fs::write(&staged, b"png bytes").unwrap();
        let stored = cache.materialize(staged, &key, "mup").unwrap();

        assert_eq!(cache.lookup(&key, "mup"), Some(stored.clone()));
        fs::write(dir.path().join("unrelated.txt"), "x").unwrap();
        assert_eq!(cache.entries().unwrap(), vec![stored]);
    }

    #[test]
    fn materialize_overwrites_existing_entry() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path(), "sr");
        let key = CacheKey::derive("x", false, false, "pmw", 360);
        for bytes in [b"first".as_slice(), b"second".as_slice()] {
            let staged = cache.staging_file().unwrap();
            fs::write(&staged, bytes).unwrap();
            cache.materialize(staged, &key, "pmw").unwrap();
        }
        assert_eq!(fs::read(cache.entry_path(&key, "pmw")).unwrap(), b"second");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn dropped_staging_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path(), "sr");
        let staged = cache.staging_file().unwrap();
        let path = staged.to_path_buf();
        assert!(path.exists());
        drop(staged);
        assert!(!path.exists());
    }
}
