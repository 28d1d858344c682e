//! LaTeX math, rendered through `latex` and `dvips`.
//!
//! The fragment is typeset as inline math in an otherwise empty page. The
//! blacklist is the classic LatexRender token list, matched as
//! case-insensitive substrings.

use super::{Notation, ProgramSpec, Stage1Job};
use crate::health::ProbeExpectation;
use crate::pipeline::compose::ComposeOptions;
use crate::pipeline::convert::Stage2Profile;
use crate::pipeline::exec::{CommandSpec, Executor};
use crate::pipeline::validate::{Blacklist, Violation};
use once_cell::sync::Lazy;
use std::io;

pub const LATEX_BIN: &str = "LATEX_BIN";
pub const DVIPS_BIN: &str = "DVIPS_BIN";

const PROGRAMS: &[ProgramSpec] = &[
    ProgramSpec {
        key: LATEX_BIN,
        name: "latex",
        probe_args: &["--version"],
        expect: ProbeExpectation::Contains(&["TeX"]),
    },
    ProgramSpec {
        key: DVIPS_BIN,
        name: "dvips",
        probe_args: &["--version"],
        expect: ProbeExpectation::Contains(&["dvips"]),
    },
];

static BLACKLIST: Lazy<Blacklist> = Lazy::new(|| {
    Blacklist::substrings(
        [
            "include", "def", "command", "loop", "repeat", "open", "toks", "output", "input",
            "catcode", "name", "^^", "\\every", "\\errhelp", "\\errorstopmode", "\\scrollmode",
            "\\nonstopmode", "\\batchmode", "\\read", "\\write", "csname", "\\newhelp",
            "\\uppercase", "\\lowercase", "\\relax", "\\aftergroup", "\\afterassignment",
            "\\expandafter", "\\noexpand", "\\special",
        ],
        true,
    )
});

const HEADER: &str = "\\documentclass[12pt]{article}
\\usepackage[utf8]{inputenc}
\\usepackage{amsmath}
\\usepackage{amsfonts}
\\usepackage{amssymb}
\\pagestyle{empty}
\\begin{document}
$";

const FOOTER: &str = "$
\\end{document}
";

#[derive(Debug, Clone, Copy, Default)]
pub struct Latex;

impl Latex {
    pub fn new() -> Self {
        Latex
    }
}

impl Notation for Latex {
    fn id(&self) -> &str {
        "latex"
    }

    fn display_name(&self) -> &str {
        "LaTeX"
    }

    fn required_programs(&self) -> &[ProgramSpec] {
        PROGRAMS
    }

    fn file_extension(&self) -> &str {
        "tex"
    }

    fn validate(&self, fragment: &str) -> Result<(), Violation> {
        BLACKLIST.check(fragment)
    }

    fn compose(&self, fragment: &str, _options: &ComposeOptions) -> String {
        format!("{HEADER}{fragment}{FOOTER}")
    }

    /// `latex` writes `<stem>.dvi` into its working directory; `dvips` turns
    /// it into encapsulated PostScript. The second command only runs when the
    /// first one succeeded.
    fn stage1(&self, job: &Stage1Job<'_>, exec: &mut Executor<'_>) -> io::Result<i32> {
        let latex = CommandSpec::new(job.program(LATEX_BIN)?)
            .arg("--interaction=nonstopmode")
            .arg(job.input_file())
            .current_dir(job.work_dir());
        let status = exec.run(&latex.into())?;
        if status != 0 {
            return Ok(status);
        }

        let dvips = CommandSpec::new(job.program(DVIPS_BIN)?)
            .args(["-E", "-o"])
            .arg(job.intermediate_file())
            .arg(job.input_file().with_extension("dvi"))
            .current_dir(job.work_dir());
        exec.run(&dvips.into())
    }

    fn stage2_profile(&self) -> Stage2Profile {
        Stage2Profile::without_alpha()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_fragment_in_inline_math() {
        let doc = Latex.compose("x^2 + y^2 = z^2", &ComposeOptions::new(360));
        assert!(doc.starts_with("\\documentclass[12pt]{article}\n"));
        assert!(doc.contains("\\begin{document}\n$x^2 + y^2 = z^2$\n\\end{document}"));
    }

    #[test]
    fn blacklist_is_case_insensitive() {
        assert!(Latex.validate("\\frac{a}{b}").is_ok());
        let v = Latex.validate("\\include{/etc/passwd}").unwrap_err();
        assert_eq!(v.pattern, "include");
        assert!(Latex.validate("\\DEF\\x{1}").is_err());
        assert!(Latex.validate("\\immediate\\Write18{ls}").is_err());
        assert!(Latex.validate("^^5c").is_err());
    }

    #[test]
    fn needs_latex_and_dvips() {
        let keys: Vec<&str> = Latex.required_programs().iter().map(|p| p.key).collect();
        assert_eq!(keys, vec![LATEX_BIN, DVIPS_BIN]);
        assert!(!Latex.stage2_profile().has_alpha);
    }
}
