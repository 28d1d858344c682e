//! Two-stage conversion: source → PostScript → PNG.
//!
//! Stage 1 is notation specific (see [`crate::notation::Notation::stage1`]).
//! Stage 2 is shared: ImageMagick trims the page to its content and applies
//! the colour effects the request asked for.
//!
//! The stages are strictly sequential. Stage 2 never starts unless stage 1's
//! success predicate accepted its result, and neither stage is retried.
//!
//! ## Stage 2 command shapes
//!
//! | transparent | intermediate has alpha | command |
//! |-------------|------------------------|---------|
//! | no  | n/a | `convert <extra> -trim +repage [-negate] in out` |
//! | yes | yes | `convert <extra> -trim +repage -channel alpha [-fx intensity -channel rgb -negate] in out` |
//! | yes | no  | `convert <extra> -trim +repage in png:- \| convert -channel alpha\|rgba -fx 1-intensity png:- out` |
//!
//! Grayscale PostScript (Mup, LaTeX) only gets a 1-bit alpha channel when
//! transparency is requested in the same pass, which leaves jagged outlines.
//! Converting to RGB PNG first and deriving alpha in a second process avoids
//! that, at the cost of a pipe.

use crate::config::ProgramPaths;
use crate::error::RenderError;
use crate::notation::{Notation, Stage1Job};
use crate::pipeline::exec::{CommandLine, CommandSpec, Executor};
use crate::pipeline::workspace::Workspace;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Which half of the conversion is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Source → page description, via the notation's own program.
    Render,
    /// Page description → PNG, via ImageMagick.
    ImageConvert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Render => f.write_str("stage 1 (render)"),
            Stage::ImageConvert => f.write_str("stage 2 (image conversion)"),
        }
    }
}

/// How stage 1 decides whether it worked.
///
/// Both predicates require a non-empty intermediate file; they differ in
/// whether the exit status is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuccessPredicate {
    /// Exit status 0 and a non-empty intermediate file.
    #[default]
    ExitStatus,
    /// A non-empty intermediate file, whatever the exit status. For programs
    /// known to exit 0 after silently producing nothing.
    NonEmptyOutput,
}

impl SuccessPredicate {
    pub fn accepts(self, status: i32, intermediate_len: u64) -> bool {
        match self {
            SuccessPredicate::ExitStatus => status == 0 && intermediate_len > 0,
            SuccessPredicate::NonEmptyOutput => intermediate_len > 0,
        }
    }
}

/// Per-notation variation of stage 2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage2Profile {
    /// The intermediate file already carries an alpha channel, so colour
    /// effects fit in a single ImageMagick pass.
    pub has_alpha: bool,
    /// Options placed before `-trim`, e.g. `-density 86`.
    pub extra_args: Vec<String>,
}

impl Stage2Profile {
    pub fn with_alpha() -> Self {
        Self {
            has_alpha: true,
            extra_args: Vec::new(),
        }
    }

    pub fn without_alpha() -> Self {
        Self::default()
    }

    pub fn extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Colour effects requested for the final image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageEffects {
    /// White on black instead of black on white.
    pub invert: bool,
    /// Transparent background.
    pub transparent: bool,
}

/// Build the ImageMagick invocation for stage 2.
pub fn stage2_command(
    convert_bin: &Path,
    intermediate: &Path,
    output: &Path,
    effects: ImageEffects,
    profile: &Stage2Profile,
) -> CommandLine {
    let base = CommandSpec::new(convert_bin)
        .args(&profile.extra_args)
        .args(["-trim", "+repage"]);

    if !effects.transparent {
        let cmd = if effects.invert { base.arg("-negate") } else { base };
        return CommandLine::new(cmd.arg(intermediate).arg(output));
    }

    if profile.has_alpha {
        let mut cmd = base.args(["-channel", "alpha"]);
        if effects.invert {
            cmd = cmd.args(["-fx", "intensity", "-channel", "rgb", "-negate"]);
        }
        return CommandLine::new(cmd.arg(intermediate).arg(output));
    }

    let channel = if effects.invert { "rgba" } else { "alpha" };
    CommandLine::new(base.arg(intermediate).arg("png:-")).pipe(
        CommandSpec::new(convert_bin)
            .args(["-channel", channel, "-fx", "1-intensity", "png:-"])
            .arg(output),
    )
}

/// Run stage 1 inside `workspace` and apply the notation's success predicate.
pub fn run_stage1(
    notation: &dyn Notation,
    workspace: &Workspace,
    programs: &ProgramPaths,
    exec: &mut Executor<'_>,
) -> Result<(), RenderError> {
    let job = Stage1Job::new(
        workspace.input_file(),
        workspace.intermediate_file(),
        workspace.path(),
        programs,
    );

    let status = notation.stage1(&job, exec).map_err(|e| {
        warn!("{} for '{}' could not run: {}", Stage::Render, notation.id(), e);
        RenderError::RenderingError {
            notation: notation.id().to_string(),
            detail: e.to_string(),
            command_output: exec.take_output(),
        }
    })?;

    let produced = workspace.intermediate_len();
    if notation.stage1_success().accepts(status, produced) {
        return Ok(());
    }

    let detail = if produced == 0 {
        format!("exit status {status}, no output was produced")
    } else {
        format!("exit status {status}")
    };
    warn!("{} for '{}' failed: {}", Stage::Render, notation.id(), detail);
    Err(RenderError::RenderingError {
        notation: notation.id().to_string(),
        detail,
        command_output: exec.take_output(),
    })
}

/// Run stage 2, writing the PNG to `output`.
pub fn run_stage2(
    convert_bin: &Path,
    intermediate: &Path,
    output: &Path,
    effects: ImageEffects,
    profile: &Stage2Profile,
    exec: &mut Executor<'_>,
) -> Result<(), RenderError> {
    let command = stage2_command(convert_bin, intermediate, output, effects, profile);
    let failure = |detail: String, exec: &mut Executor<'_>| {
        warn!("{} failed: {}", Stage::ImageConvert, detail);
        RenderError::ImageConvertFailure {
            detail,
            command_output: exec.take_output(),
        }
    };

    match exec.run(&command) {
        Ok(0) => {
            let len = fs::metadata(output).map(|m| m.len()).unwrap_or(0);
            if len > 0 {
                Ok(())
            } else {
                Err(failure("exit status 0 but the image is empty".into(), exec))
            }
        }
        Ok(status) => Err(failure(format!("exit status {status}"), exec)),
        Err(e) => Err(failure(e.to_string(), exec)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn args(line: &CommandLine, idx: usize) -> Vec<String> {
        line.commands()[idx]
            .get_args()
            .iter()
            .map(|a: &OsString| a.to_string_lossy().into_owned())
            .collect()
    }

    fn paths() -> (PathBuf, PathBuf, PathBuf) {
        (
            PathBuf::from("/usr/bin/convert"),
            PathBuf::from("/tmp/w/fragment.ps"),
            PathBuf::from("/cache/out.png"),
        )
    }

    #[test]
    fn predicates() {
        assert!(SuccessPredicate::ExitStatus.accepts(0, 10));
        assert!(!SuccessPredicate::ExitStatus.accepts(0, 0));
        assert!(!SuccessPredicate::ExitStatus.accepts(1, 10));
        assert!(SuccessPredicate::NonEmptyOutput.accepts(1, 10));
        assert!(SuccessPredicate::NonEmptyOutput.accepts(0, 10));
        assert!(!SuccessPredicate::NonEmptyOutput.accepts(0, 0));
    }

    #[test]
    fn opaque_plain() {
        let (c, i, o) = paths();
        let line = stage2_command(&c, &i, &o, ImageEffects::default(), &Stage2Profile::with_alpha());
        assert_eq!(line.commands().len(), 1);
        assert_eq!(
            args(&line, 0),
            vec!["-trim", "+repage", "/tmp/w/fragment.ps", "/cache/out.png"]
        );
    }

    #[test]
    fn opaque_inverted_with_extra_args() {
        let (c, i, o) = paths();
        let profile = Stage2Profile::with_alpha().extra_args(["-density", "86"]);
        let effects = ImageEffects {
            invert: true,
            transparent: false,
        };
        let line = stage2_command(&c, &i, &o, effects, &profile);
        assert_eq!(
            args(&line, 0),
            vec!["-density", "86", "-trim", "+repage", "-negate", "/tmp/w/fragment.ps", "/cache/out.png"]
        );
    }

    #[test]
    fn transparent_with_alpha_is_single_pass() {
        let (c, i, o) = paths();
        let effects = ImageEffects {
            invert: true,
            transparent: true,
        };
        let line = stage2_command(&c, &i, &o, effects, &Stage2Profile::with_alpha());
        assert_eq!(line.commands().len(), 1);
        assert_eq!(
            args(&line, 0),
            vec![
                "-trim", "+repage", "-channel", "alpha", "-fx", "intensity", "-channel", "rgb",
                "-negate", "/tmp/w/fragment.ps", "/cache/out.png"
            ]
        );
    }

    #[test]
    fn transparent_without_alpha_pipes_two_passes() {
        let (c, i, o) = paths();
        let effects = ImageEffects {
            invert: false,
            transparent: true,
        };
        let line = stage2_command(&c, &i, &o, effects, &Stage2Profile::without_alpha());
        assert_eq!(line.commands().len(), 2);
        assert_eq!(args(&line, 0), vec!["-trim", "+repage", "/tmp/w/fragment.ps", "png:-"]);
        assert_eq!(
            args(&line, 1),
            vec!["-channel", "alpha", "-fx", "1-intensity", "png:-", "/cache/out.png"]
        );

        let inverted = ImageEffects {
            invert: true,
            transparent: true,
        };
        let line = stage2_command(&c, &i, &o, inverted, &Stage2Profile::without_alpha());
        assert_eq!(args(&line, 1)[1], "rgba");
    }
}
