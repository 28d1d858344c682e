//! Arkkra Mup.
//!
//! Mup refuses to render without a "magic" registration file (`.mup`, or
//! `mup.ok` on Windows) in its working directory or `$HOME`, and exits 0
//! when it refuses. Stage 1 therefore drops the file into the private work
//! directory, points `HOME` there, and judges success by output size alone.

use super::{Notation, ProgramSpec, Stage1Job};
use crate::health::ProbeExpectation;
use crate::pipeline::compose::{format_dimension, ComposeOptions};
use crate::pipeline::convert::{Stage2Profile, SuccessPredicate};
use crate::pipeline::exec::{CommandSpec, Executor};
use crate::pipeline::validate::{Blacklist, Violation};
use once_cell::sync::Lazy;
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

pub const MUP_BIN: &str = "MUP_BIN";

/// Optional registration file copied in as the magic file.
pub const MUP_MAGIC_FILE: &str = "MUP_MAGIC_FILE";

const PROGRAMS: &[ProgramSpec] = &[ProgramSpec {
    key: MUP_BIN,
    name: "mup",
    probe_args: &["-v"],
    expect: ProbeExpectation::Contains(&["Arkkra Enterprises"]),
}];

/// Directives that read other files. Shared with PMW, whose syntax has the
/// same hazards.
pub(crate) static INCLUDE_BLACKLIST: Lazy<Blacklist> =
    Lazy::new(|| Blacklist::line_anchored([r"^\s*\binclude\b", r"^\s*\bfontfile\b"]).unwrap());

fn magic_file_name() -> &'static str {
    if cfg!(windows) {
        "mup.ok"
    } else {
        ".mup"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Mup;

impl Mup {
    pub fn new() -> Self {
        Mup
    }

    fn install_magic_file(job: &Stage1Job<'_>) -> io::Result<PathBuf> {
        let target = job.work_dir().join(magic_file_name());
        match job.setting(MUP_MAGIC_FILE) {
            Some(source) if source.is_file() => {
                fs::copy(source, &target)?;
                debug!("Copied Mup registration file from {}", source.display());
            }
            Some(source) => {
                warn!(
                    "Mup registration file {} is not readable, rendering unregistered",
                    source.display()
                );
                File::create(&target)?;
            }
            None => {
                File::create(&target)?;
            }
        }
        Ok(target)
    }
}

impl Notation for Mup {
    fn id(&self) -> &str {
        "mup"
    }

    fn display_name(&self) -> &str {
        "Mup"
    }

    fn required_programs(&self) -> &[ProgramSpec] {
        PROGRAMS
    }

    fn file_extension(&self) -> &str {
        "mup"
    }

    fn validate(&self, fragment: &str) -> Result<(), Violation> {
        INCLUDE_BLACKLIST.check(fragment)
    }

    fn compose(&self, fragment: &str, options: &ComposeOptions) -> String {
        format!(
            "//!Mup-Arkkra-5.0\n\
             score\n\
             leftmargin = 0\n\
             rightmargin = 0\n\
             topmargin = 0\n\
             bottommargin = 0\n\
             pagewidth = {}\n\
             label = \"\"\n\
             {}",
            format_dimension(options.width_inches()),
            fragment
        )
    }

    fn stage1(&self, job: &Stage1Job<'_>, exec: &mut Executor<'_>) -> io::Result<i32> {
        let program = job.program(MUP_BIN)?;
        let magic = Self::install_magic_file(job)?;

        let cmd = CommandSpec::new(program)
            .arg("-f")
            .arg(job.intermediate_file())
            .arg(job.input_file())
            .current_dir(job.work_dir())
            .env("HOME", job.work_dir());
        let status = exec.run(&cmd.into());

        if let Err(e) = fs::remove_file(&magic) {
            debug!("Could not remove {}: {}", magic.display(), e);
        }
        status
    }

    fn stage1_success(&self) -> SuccessPredicate {
        SuccessPredicate::NonEmptyOutput
    }

    fn stage2_profile(&self) -> Stage2Profile {
        // ImageMagick sees an alpha channel in Mup's PostScript on Windows only.
        if cfg!(windows) {
            Stage2Profile::with_alpha()
        } else {
            Stage2Profile::without_alpha()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgramPaths;
    use tempfile::TempDir;

    #[test]
    fn composes_header_with_width_in_inches() {
        let doc = Mup.compose("music\n1: c;d;e;f;\nbar\n", &ComposeOptions::new(360));
        assert!(doc.starts_with("//!Mup-Arkkra-5.0\nscore\nleftmargin = 0\n"));
        assert!(doc.contains("\npagewidth = 5\n"));
        assert!(doc.contains("label = \"\"\nmusic\n"));

        let doc = Mup.compose("music", &ComposeOptions::new(400));
        assert!(doc.contains("\npagewidth = 5.5556\n"));
    }

    #[test]
    fn rejects_include_and_fontfile_lines() {
        assert!(Mup.validate("score\nmusic\n1: c;\nbar\n").is_ok());
        assert!(Mup.validate("include \"/etc/passwd\"").is_err());
        assert!(Mup.validate("music\n  fontfile \"x\"\n").is_err());
        assert!(Mup.validate("title \"include\"").is_ok());
    }

    #[test]
    fn success_is_judged_by_output_size() {
        assert_eq!(Mup.stage1_success(), SuccessPredicate::NonEmptyOutput);
    }

    #[test]
    fn magic_file_is_created_or_copied() {
        let work = TempDir::new().unwrap();
        let (input, ps) = (work.path().join("fragment.mup"), work.path().join("fragment.ps"));

        let programs = ProgramPaths::new();
        let job = Stage1Job::new(&input, &ps, work.path(), &programs);
        let magic = Mup::install_magic_file(&job).unwrap();
        assert_eq!(magic.parent().unwrap(), work.path());
        assert_eq!(fs::read(&magic).unwrap().len(), 0);

        let registration = work.path().join("registered");
        fs::write(&registration, "key 1234\n").unwrap();
        let mut programs = ProgramPaths::new();
        programs.insert(MUP_MAGIC_FILE.into(), registration);
        let job = Stage1Job::new(&input, &ps, work.path(), &programs);
        let magic = Mup::install_magic_file(&job).unwrap();
        assert_eq!(fs::read_to_string(&magic).unwrap(), "key 1234\n");
    }
}
