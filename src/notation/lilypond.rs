//! GNU LilyPond.
//!
//! LilyPond derives its output name from `--output` and appends `.ps` itself,
//! so stage 1 passes the intermediate path with the extension stripped.
//! Safe mode is requested with `-s` before 2.11 and `-dsafe` afterwards.
//! Recent releases no longer honour safe mode, so fragments are also checked
//! against a blacklist of Scheme escapes and file access.

use super::{Notation, ProgramSpec, Stage1Job};
use crate::health::ProbeExpectation;
use crate::pipeline::compose::{format_dimension, strip_carriage_returns, ComposeOptions};
use crate::pipeline::convert::Stage2Profile;
use crate::pipeline::exec::{CommandSpec, Executor};
use crate::pipeline::validate::{Blacklist, Violation};
use once_cell::sync::Lazy;
use std::io;

pub const LILYPOND_BIN: &str = "LILYPOND_BIN";

const PROGRAMS: &[ProgramSpec] = &[ProgramSpec {
    key: LILYPOND_BIN,
    name: "lilypond",
    probe_args: &["--version"],
    expect: ProbeExpectation::Contains(&["GNU LilyPond"]),
}];

static BLACKLIST: Lazy<Blacklist> = Lazy::new(|| {
    Blacklist::line_anchored([
        r"\\include\b",
        r"\(\s*(ly:)?system\b",
        r"ly:gulp-file",
        r"ly:parser-include-string",
        r"open-(input|output)-file",
    ])
    .unwrap()
});

/// First release where `-s` no longer selects safe mode.
const SAFE_FLAG_CHANGE: (u32, u32, u32) = (2, 11, 0);

#[derive(Debug, Clone, Default)]
pub struct LilyPond {
    version: Option<String>,
}

impl LilyPond {
    /// Assume a current LilyPond.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the flags appropriate for a known version, typically obtained
    /// from [`crate::health::lilypond_version`].
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
        }
    }

    fn safe_flag(&self) -> &'static str {
        match self.version.as_deref().and_then(parse_version) {
            Some(v) if v < SAFE_FLAG_CHANGE => "-s",
            _ => "-dsafe",
        }
    }
}

fn parse_version(v: &str) -> Option<(u32, u32, u32)> {
    let mut parts = v.trim().split('.').map(|p| p.parse::<u32>().ok());
    Some((parts.next()??, parts.next()??, parts.next().flatten().unwrap_or(0)))
}

impl Notation for LilyPond {
    fn id(&self) -> &str {
        "lilypond"
    }

    fn display_name(&self) -> &str {
        "LilyPond"
    }

    fn required_programs(&self) -> &[ProgramSpec] {
        PROGRAMS
    }

    fn file_extension(&self) -> &str {
        "ly"
    }

    fn validate(&self, fragment: &str) -> Result<(), Violation> {
        BLACKLIST.check(fragment)
    }

    fn compose(&self, fragment: &str, options: &ComposeOptions) -> String {
        format!(
            r#"\version "2.8.1"
\header {{
	tagline= ""
}}
\paper {{
	ragged-right = ##t
	indent = 0.0\mm
	line-width = {}\pt
}}
\layout {{
	\context {{
		\Score
		\remove "Bar_number_engraver"
	}}
}}
{}"#,
            format_dimension(options.width_points()),
            strip_carriage_returns(fragment)
        )
    }

    fn stage1(&self, job: &Stage1Job<'_>, exec: &mut Executor<'_>) -> io::Result<i32> {
        let output_base = job.intermediate_file().with_extension("");
        let cmd = CommandSpec::new(job.program(LILYPOND_BIN)?)
            .arg(self.safe_flag())
            .args(["--ps", "--output"])
            .arg(output_base)
            .arg(job.input_file())
            .current_dir(job.work_dir());
        exec.run(&cmd.into())
    }

    fn stage2_profile(&self) -> Stage2Profile {
        // Default staff size is 20px where 24px reads better: 72 * 1.2 ≈ 86.
        Stage2Profile::with_alpha().extra_args(["-equalize", "-density", "86"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_header_with_width_in_points() {
        let doc = LilyPond::new().compose("{ c' d' e' f' }\r\n", &ComposeOptions::new(360));
        assert!(doc.starts_with("\\version \"2.8.1\"\n"));
        assert!(doc.contains("line-width = 360\\pt"));
        assert!(doc.contains("\\remove \"Bar_number_engraver\""));
        assert!(doc.ends_with("}\n{ c' d' e' f' }\n"));
        assert!(!doc.contains('\r'));
    }

    #[test]
    fn safe_flag_depends_on_version() {
        assert_eq!(LilyPond::new().safe_flag(), "-dsafe");
        assert_eq!(LilyPond::with_version("2.10.33").safe_flag(), "-s");
        assert_eq!(LilyPond::with_version("2.8.1").safe_flag(), "-s");
        assert_eq!(LilyPond::with_version("2.11.0").safe_flag(), "-dsafe");
        assert_eq!(LilyPond::with_version("2.24.3").safe_flag(), "-dsafe");
        assert_eq!(LilyPond::with_version("garbage").safe_flag(), "-dsafe");
    }

    #[test]
    fn rejects_scheme_escapes_and_includes() {
        let ly = LilyPond::new();
        for fragment in [
            "#(system \"rm -rf /\")",
            "{ c' }\n#( ly:system \"id\")",
            "#(display (ly:gulp-file \"/etc/passwd\"))",
            "\\include \"/etc/passwd\"",
            "#(open-input-file \"/etc/shadow\")",
        ] {
            assert!(ly.validate(fragment).is_err(), "{fragment}");
        }
        assert!(ly.validate("{ c'4 d' e' f' | g'1 \\bar \"|.\" }").is_ok());
        assert!(ly.validate("\\relative c'' { \\time 3/4 a b c }").is_ok());
    }

    #[test]
    fn stage2_uses_alpha_and_density() {
        let profile = LilyPond::new().stage2_profile();
        assert!(profile.has_alpha);
        assert_eq!(profile.extra_args, vec!["-equalize", "-density", "86"]);
    }
}
