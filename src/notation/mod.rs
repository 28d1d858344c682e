//! Notation families and the registry that maps identifiers to them.
//!
//! A [`Notation`] supplies the variation points of the render pipeline:
//! validation rules, document composition, the stage-1 command, the stage-1
//! success predicate and the stage-2 profile. Everything else (cache lookup,
//! directory checks, temp files, stage 2 itself, cleanup) is shared and lives
//! in [`crate::render`].
//!
//! Built-in notations:
//!
//! | id         | program(s)            | intermediate | stage-1 success |
//! |------------|-----------------------|--------------|-----------------|
//! | `lilypond` | `lilypond`            | PS, alpha    | exit status     |
//! | `mup`      | `mup`                 | PS, gray     | non-empty PS    |
//! | `pmw`      | `pmw`                 | PS, alpha    | exit status     |
//! | `latex`    | `latex`, `dvips`      | EPS, gray    | exit status     |

pub mod latex;
pub mod lilypond;
pub mod mup;
pub mod pmw;

pub use latex::Latex;
pub use lilypond::LilyPond;
pub use mup::Mup;
pub use pmw::Pmw;

use crate::config::ProgramPaths;
use crate::error::RegistryError;
use crate::health::ProbeExpectation;
use crate::pipeline::compose::ComposeOptions;
use crate::pipeline::convert::{Stage2Profile, SuccessPredicate};
use crate::pipeline::exec::Executor;
use crate::pipeline::validate::Violation;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static RE_IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").unwrap());

/// An external program a notation depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSpec {
    /// Setting key under which the executable path is configured.
    pub key: &'static str,
    /// Conventional executable name, used for discovery on `PATH`.
    pub name: &'static str,
    /// Arguments that make the program print a recognisable banner.
    pub probe_args: &'static [&'static str],
    /// What the banner must look like.
    pub expect: ProbeExpectation,
}

/// Paths handed to a notation's stage 1.
///
/// All paths live in the render's private workspace. Commands should set
/// [`crate::pipeline::exec::CommandSpec::current_dir`] to
/// [`Stage1Job::work_dir`] when the program drops auxiliary files next to
/// its working directory.
#[derive(Debug, Clone, Copy)]
pub struct Stage1Job<'a> {
    input_file: &'a Path,
    intermediate_file: &'a Path,
    work_dir: &'a Path,
    programs: &'a ProgramPaths,
}

impl<'a> Stage1Job<'a> {
    pub fn new(
        input_file: &'a Path,
        intermediate_file: &'a Path,
        work_dir: &'a Path,
        programs: &'a ProgramPaths,
    ) -> Self {
        Self {
            input_file,
            intermediate_file,
            work_dir,
            programs,
        }
    }

    pub fn input_file(&self) -> &'a Path {
        self.input_file
    }

    pub fn intermediate_file(&self) -> &'a Path {
        self.intermediate_file
    }

    pub fn work_dir(&self) -> &'a Path {
        self.work_dir
    }

    /// Configured path for a required program.
    ///
    /// # Errors
    /// [`io::ErrorKind::NotFound`] when the key is not configured.
    pub fn program(&self, key: &str) -> io::Result<&'a Path> {
        self.setting(key).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{key} is not configured"))
        })
    }

    /// Optional path setting, e.g. a registration file.
    pub fn setting(&self, key: &str) -> Option<&'a Path> {
        self.programs.get(key).map(PathBuf::as_path)
    }
}

/// One notation family.
pub trait Notation: Send + Sync {
    /// Registry identifier; also embedded in cache file names.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn display_name(&self) -> &str;

    fn required_programs(&self) -> &[ProgramSpec];

    /// Extension of the stage-1 input file, without the dot.
    fn file_extension(&self) -> &str;

    /// Reject dangerous constructs. The default accepts everything.
    fn validate(&self, _fragment: &str) -> Result<(), Violation> {
        Ok(())
    }

    /// Wrap the raw fragment into a complete document.
    fn compose(&self, fragment: &str, options: &ComposeOptions) -> String;

    /// Produce [`Stage1Job::intermediate_file`] from [`Stage1Job::input_file`].
    ///
    /// Returns the exit status of the last command run. An `Err` means a
    /// program could not be started at all.
    fn stage1(&self, job: &Stage1Job<'_>, exec: &mut Executor<'_>) -> io::Result<i32>;

    fn stage1_success(&self) -> SuccessPredicate {
        SuccessPredicate::ExitStatus
    }

    fn stage2_profile(&self) -> Stage2Profile;
}

impl fmt::Debug for dyn Notation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notation").field("id", &self.id()).finish()
    }
}

/// Identifier → notation lookup.
#[derive(Clone, Default)]
pub struct NotationRegistry {
    notations: BTreeMap<String, Arc<dyn Notation>>,
}

impl NotationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// LilyPond, Mup, PMW and LaTeX with default settings.
    pub fn with_builtin() -> Self {
        let builtin: [Arc<dyn Notation>; 4] = [
            Arc::new(LilyPond::new()),
            Arc::new(Mup::new()),
            Arc::new(Pmw::new()),
            Arc::new(Latex::new()),
        ];
        let notations = builtin
            .into_iter()
            .map(|n| (n.id().to_string(), n))
            .collect();
        Self { notations }
    }

    /// Add a notation.
    ///
    /// # Errors
    /// The identifier must be a non-empty word and not yet registered.
    pub fn register(&mut self, notation: Arc<dyn Notation>) -> Result<(), RegistryError> {
        let id = notation.id().to_string();
        if !RE_IDENTIFIER.is_match(&id) {
            return Err(RegistryError::InvalidIdentifier(id));
        }
        if self.notations.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        self.notations.insert(id, notation);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Notation>> {
        self.notations.get(id)
    }

    /// Registered identifiers in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.notations.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Notation>> {
        self.notations.values()
    }

    pub fn len(&self) -> usize {
        self.notations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notations.is_empty()
    }
}

impl fmt::Debug for NotationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(&'static str);

    impl Notation for Dummy {
        fn id(&self) -> &str {
            self.0
        }
        fn display_name(&self) -> &str {
            "Dummy"
        }
        fn required_programs(&self) -> &[ProgramSpec] {
            &[]
        }
        fn file_extension(&self) -> &str {
            "txt"
        }
        fn compose(&self, fragment: &str, _options: &ComposeOptions) -> String {
            fragment.to_string()
        }
        fn stage1(&self, _job: &Stage1Job<'_>, _exec: &mut Executor<'_>) -> io::Result<i32> {
            Ok(0)
        }
        fn stage2_profile(&self) -> Stage2Profile {
            Stage2Profile::with_alpha()
        }
    }

    #[test]
    fn builtin_registry() {
        let reg = NotationRegistry::with_builtin();
        assert_eq!(reg.ids().collect::<Vec<_>>(), vec!["latex", "lilypond", "mup", "pmw"]);
        assert_eq!(reg.get("mup").unwrap().display_name(), "Mup");
        assert!(reg.get("guido").is_none());
    }

    #[test]
    fn register_rejects_duplicates_and_bad_ids() {
        let mut reg = NotationRegistry::with_builtin();
        assert!(reg.register(Arc::new(Dummy("X"))).is_ok());
        assert!(matches!(
            reg.register(Arc::new(Dummy("X"))),
            Err(RegistryError::Duplicate(id)) if id == "X"
        ));
        assert!(matches!(
            reg.register(Arc::new(Dummy("no-dash"))),
            Err(RegistryError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            reg.register(Arc::new(Dummy(""))),
            Err(RegistryError::InvalidIdentifier(_))
        ));
        assert_eq!(reg.len(), 5);
    }

    #[test]
    fn job_program_lookup() {
        let mut programs = ProgramPaths::new();
        programs.insert("MUP_BIN".into(), PathBuf::from("/usr/bin/mup"));
        let dir = Path::new("/tmp/w");
        let (input, ps) = (dir.join("a.mup"), dir.join("a.ps"));
        let job = Stage1Job::new(&input, &ps, dir, &programs);
        assert_eq!(job.program("MUP_BIN").unwrap(), Path::new("/usr/bin/mup"));
        assert_eq!(
            job.program("PMW_BIN").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
        assert!(job.setting("MUP_MAGIC_FILE").is_none());
    }
}
