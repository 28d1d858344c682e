//! Configuration-time checks for the external programs.
//!
//! These probes run a program with a harmless argument (`--version` and
//! friends) and look for a recognisable banner in what it prints. They are
//! meant for start-up diagnostics and the CLI's `--check` mode; the render
//! path only performs the cheap "is it an executable file" test.

use crate::config::ProgramPaths;
use crate::notation::{Notation, NotationRegistry};
use crate::pipeline::exec::{CommandLine, CommandSpec, ProcessRunner, SystemRunner};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Only this many bytes of a probe's output are inspected.
pub const PROBE_READ_LIMIT: usize = 2048;

/// A probe that hangs is treated as unusable after this long.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

static RE_LILYPOND_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^gnu lilypond (\d+\.\d+\.\d+)").unwrap());

/// What a program's banner must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeExpectation {
    /// Every string must occur somewhere in the output.
    Contains(&'static [&'static str]),
    /// The regex must match (multi-line mode).
    Matches(&'static str),
}

impl ProbeExpectation {
    pub fn check(&self, output: &str) -> bool {
        match self {
            ProbeExpectation::Contains(needles) => needles.iter().all(|n| output.contains(n)),
            ProbeExpectation::Matches(pattern) => Regex::new(&format!("(?m){pattern}"))
                .map(|re| re.is_match(output))
                .unwrap_or(false),
        }
    }
}

/// Whether `path` is a file the current user may execute.
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Run `prog args…` and test the first [`PROBE_READ_LIMIT`] bytes of its
/// combined output against `expect`.
pub fn is_prog_usable(prog: &Path, args: &[&str], expect: &ProbeExpectation) -> bool {
    probe(prog, args)
        .map(|output| expect.check(&output))
        .unwrap_or(false)
}

/// Whether `convert` is ImageMagick's `convert`.
pub fn imagemagick_usable(convert: &Path) -> bool {
    is_prog_usable(convert, &["-version"], &ProbeExpectation::Contains(&["ImageMagick"]))
}

/// LilyPond's version number, e.g. `"2.24.3"`.
pub fn lilypond_version(lilypond: &Path) -> Option<String> {
    let output = probe(lilypond, &["-v"])?;
    let first_line = output.lines().next()?;
    RE_LILYPOND_VERSION
        .captures(first_line)
        .map(|caps| caps[1].to_string())
}

fn probe(prog: &Path, args: &[&str]) -> Option<String> {
    if !is_executable(prog) {
        debug!("{} is not executable", prog.display());
        return None;
    }
    let command: CommandLine = CommandSpec::new(prog).args(args).into();
    match SystemRunner.run(&command, Some(PROBE_TIMEOUT)) {
        Ok(outcome) => Some(truncate(outcome.output, PROBE_READ_LIMIT)),
        Err(e) => {
            debug!("Probe {} failed: {}", command, e);
            None
        }
    }
}

fn truncate(mut s: String, limit: usize) -> String {
    if s.len() > limit {
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

/// A required program that failed its check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramProblem {
    /// Setting key, e.g. `MUP_BIN`.
    pub key: String,
    pub path: Option<PathBuf>,
    pub reason: String,
}

/// Outcome of checking one notation's programs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotationHealth {
    pub notation: String,
    pub name: String,
    pub problems: Vec<ProgramProblem>,
}

impl NotationHealth {
    pub fn is_usable(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Probe every program `notation` needs.
pub fn check_notation(notation: &dyn Notation, programs: &ProgramPaths) -> NotationHealth {
    let problems = notation
        .required_programs()
        .iter()
        .filter_map(|spec| {
            let Some(path) = programs.get(spec.key) else {
                return Some(ProgramProblem {
                    key: spec.key.to_string(),
                    path: None,
                    reason: "not configured".into(),
                });
            };
            if is_prog_usable(path, spec.probe_args, &spec.expect) {
                None
            } else {
                Some(ProgramProblem {
                    key: spec.key.to_string(),
                    path: Some(path.clone()),
                    reason: format!("'{}' did not identify itself as {}", path.display(), spec.name),
                })
            }
        })
        .collect();

    NotationHealth {
        notation: notation.id().to_string(),
        name: notation.display_name().to_string(),
        problems,
    }
}

/// [`check_notation`] for every registered notation.
pub fn check_notations(registry: &NotationRegistry, programs: &ProgramPaths) -> Vec<NotationHealth> {
    registry
        .iter()
        .map(|n| check_notation(n.as_ref(), programs))
        .collect()
}

/// Find an executable by name on `PATH`, then in a few conventional places
/// (`/usr/local/bin`, `/opt/bin`, `/opt/*/bin`).
pub fn locate_program(name: &str) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();

    if cfg!(unix) {
        dirs.push(PathBuf::from("/usr/local/bin"));
        dirs.push(PathBuf::from("/opt/bin"));
        if let Ok(entries) = fs::read_dir("/opt") {
            let mut opt: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|e| e.path().join("bin"))
                .collect();
            opt.sort();
            dirs.extend(opt);
        }
    }

    let file_name = if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    };

    dirs.into_iter()
        .map(|d| d.join(&file_name))
        .find(|candidate| is_executable(candidate))
        .map(|found| found.canonicalize().unwrap_or(found))
}

/// Locate every program the registered notations need.
///
/// Keys already present in `programs` are left alone.
pub fn discover_programs(registry: &NotationRegistry, programs: &mut ProgramPaths) {
    for notation in registry.iter() {
        for spec in notation.required_programs() {
            if programs.contains_key(spec.key) {
                continue;
            }
            if let Some(path) = locate_program(spec.name) {
                debug!("Found {} at {}", spec.name, path.display());
                programs.insert(spec.key.to_string(), path);
            }
        }
    }
}
