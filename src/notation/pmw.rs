//! Philip's Music Writer.

use super::mup::INCLUDE_BLACKLIST;
use super::{Notation, ProgramSpec, Stage1Job};
use crate::health::ProbeExpectation;
use crate::pipeline::compose::{format_dimension, normalize_linebreaks, ComposeOptions};
use crate::pipeline::convert::Stage2Profile;
use crate::pipeline::exec::{CommandSpec, Executor};
use crate::pipeline::validate::Violation;
use std::io;

pub const PMW_BIN: &str = "PMW_BIN";

const PROGRAMS: &[ProgramSpec] = &[ProgramSpec {
    key: PMW_BIN,
    name: "pmw",
    probe_args: &["-V"],
    expect: ProbeExpectation::Matches(r"^PMW version ([\d.-]+)"),
}];

#[derive(Debug, Clone, Copy, Default)]
pub struct Pmw;

impl Pmw {
    pub fn new() -> Self {
        Pmw
    }
}

impl Notation for Pmw {
    fn id(&self) -> &str {
        "pmw"
    }

    fn display_name(&self) -> &str {
        "Philip's Music Writer"
    }

    fn required_programs(&self) -> &[ProgramSpec] {
        PROGRAMS
    }

    fn file_extension(&self) -> &str {
        "pmw"
    }

    fn validate(&self, fragment: &str) -> Result<(), Violation> {
        INCLUDE_BLACKLIST.check(fragment)
    }

    // The sheet size here and `-page` in the stage 2 profile must agree.
    fn compose(&self, fragment: &str, options: &ComposeOptions) -> String {
        normalize_linebreaks(&format!(
            "Sheetsize A3\nLinelength {}\nMagnification 1.5\n\n{}",
            format_dimension(options.width_points()),
            fragment
        ))
    }

    fn stage1(&self, job: &Stage1Job<'_>, exec: &mut Executor<'_>) -> io::Result<i32> {
        let cmd = CommandSpec::new(job.program(PMW_BIN)?)
            .args(["-norc", "-includefont", "-o"])
            .arg(job.intermediate_file())
            .arg(job.input_file())
            .current_dir(job.work_dir());
        exec.run(&cmd.into())
    }

    // Assumes ImageMagick 6.3.9-6 or newer; older releases drop PMW's alpha
    // channel and would need `without_alpha`. The version is not probed.
    fn stage2_profile(&self) -> Stage2Profile {
        Stage2Profile::with_alpha().extra_args(["-page", "a3"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::convert::SuccessPredicate;

    #[test]
    fn composes_sheet_header_and_normalises_line_endings() {
        let doc = Pmw.compose("[stave 1 treble 1]\r\nc d e f |\r[endstave]", &ComposeOptions::new(360));
        assert_eq!(
            doc,
            "Sheetsize A3\nLinelength 360\nMagnification 1.5\n\n[stave 1 treble 1]\nc d e f |\n[endstave]"
        );
    }

    #[test]
    fn shares_the_include_blacklist() {
        assert!(Pmw.validate("include \"x\"").is_err());
        assert!(Pmw.validate("[stave 1 treble 1] c d e f [endstave]").is_ok());
    }

    #[test]
    fn trusts_the_exit_status() {
        assert_eq!(Pmw.stage1_success(), SuccessPredicate::ExitStatus);
        let profile = Pmw.stage2_profile();
        assert!(profile.has_alpha);
        assert_eq!(profile.extra_args, vec!["-page", "a3"]);
    }
}
