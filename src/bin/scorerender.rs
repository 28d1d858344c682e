//! CLI binary for scorerender.
//!
//! A thin shim over the library crate that maps CLI flags to `RenderConfig`,
//! renders each input file and prints the resulting cache file names.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scorerender::health::{self, NotationHealth};
use scorerender::notation::latex::{DVIPS_BIN, LATEX_BIN};
use scorerender::notation::lilypond::LILYPOND_BIN;
use scorerender::notation::mup::{MUP_BIN, MUP_MAGIC_FILE};
use scorerender::notation::pmw::PMW_BIN;
use scorerender::notation::{Latex, LilyPond, Mup, Pmw};
use scorerender::pipeline::convert::Stage;
use scorerender::{
    ErrorCode, NotationRegistry, ProgramPaths, ProgressCallback, RenderConfig, RenderError,
    RenderOutput, RenderProgressCallback, Renderer,
};
use serde::Serialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress bar over the list of inputs, with one log line per
/// finished render.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} fragments  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Rendering");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        let total = self.bar.length().unwrap_or(0) as usize;
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!("{} {} fragments rendered", green("✔"), bold(&total.to_string()));
        } else {
            eprintln!(
                "{} {}/{} fragments rendered  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&(total - failed).to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

impl RenderProgressCallback for CliProgressCallback {
    fn on_render_start(&self, notation: &str, _cache_key: &str) {
        self.bar.set_message(notation.to_string());
    }

    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(stage.to_string());
    }

    fn on_render_complete(&self, file_name: &str, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            file_name,
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_render_error(&self, code: ErrorCode, message: &str) {
        self.fail(&code.to_string(), message);
    }
}

impl CliProgressCallback {
    /// Count an input that never reached the renderer.
    fn on_input_error(&self, input: &Path, message: &str) {
        self.fail(&input.display().to_string(), message);
    }

    fn fail(&self, label: &str, message: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if message.chars().count() > 80 {
            format!("{}\u{2026}", message.chars().take(79).collect::<String>())
        } else {
            message.to_string()
        };
        self.bar.println(format!("  {} {}  {}", red("✗"), label, red(&msg)));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render a LilyPond fragment; prints the cache file name
  scorerender --cache-dir ./cache melody.ly

  # Mup from stdin, white on black, opaque background
  echo 'music
  1: c;d;e;f;
  bar' | scorerender -n mup --invert --opaque -

  # Several files, JSON records with image sizes
  scorerender --json --cache-dir ./cache a.ly b.mup c.tex

  # Check which notations are usable on this machine
  scorerender --check

NOTATIONS:
  Id         Extension  Programs
  ────────   ─────────  ───────────────
  lilypond   .ly        lilypond
  mup        .mup       mup
  pmw        .pmw       pmw
  latex      .tex       latex, dvips

  Programs not given explicitly are searched on PATH, then in
  /usr/local/bin, /opt/bin and /opt/*/bin.

ENVIRONMENT VARIABLES:
  Every option can also be set as SCORERENDER_<OPTION>, e.g.
  SCORERENDER_CACHE_DIR=/var/cache/scores. RUST_LOG overrides -v / -q.
"#;

/// Render music notation and LaTeX fragments to cached PNG images.
#[derive(Parser, Debug)]
#[command(
    name = "scorerender",
    version,
    about = "Render music notation and LaTeX fragments to cached PNG images",
    long_about = "Render untrusted LilyPond, Mup, PMW and LaTeX fragments to PNG images \
through the notation's own program and ImageMagick. Results are cached by content, so \
rendering the same fragment twice runs nothing the second time.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Fragment files to render; `-` reads standard input.
    #[arg(required_unless_present = "check")]
    inputs: Vec<PathBuf>,

    /// Notation id (lilypond, mup, pmw, latex). Inferred from the file
    /// extension when omitted.
    #[arg(short, long, env = "SCORERENDER_NOTATION")]
    notation: Option<String>,

    /// Directory holding rendered images. Must already exist.
    #[arg(long, env = "SCORERENDER_CACHE_DIR", default_value = ".")]
    cache_dir: PathBuf,

    /// Directory for per-render work areas. Default: system temp dir.
    #[arg(long, env = "SCORERENDER_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// ImageMagick `convert` executable.
    #[arg(long, env = "SCORERENDER_CONVERT")]
    convert: Option<PathBuf>,

    /// LilyPond executable.
    #[arg(long, env = "SCORERENDER_LILYPOND")]
    lilypond: Option<PathBuf>,

    /// Mup executable.
    #[arg(long, env = "SCORERENDER_MUP")]
    mup: Option<PathBuf>,

    /// Mup registration ("magic") file.
    #[arg(long, env = "SCORERENDER_MUP_MAGIC_FILE")]
    mup_magic_file: Option<PathBuf>,

    /// PMW executable.
    #[arg(long, env = "SCORERENDER_PMW")]
    pmw: Option<PathBuf>,

    /// LaTeX executable.
    #[arg(long, env = "SCORERENDER_LATEX")]
    latex: Option<PathBuf>,

    /// dvips executable.
    #[arg(long, env = "SCORERENDER_DVIPS")]
    dvips: Option<PathBuf>,

    /// Maximum image width in pixels.
    #[arg(long, env = "SCORERENDER_WIDTH", default_value_t = 360,
          value_parser = clap::value_parser!(u32).range(1..))]
    width: u32,

    /// White on black instead of black on white.
    #[arg(long, env = "SCORERENDER_INVERT")]
    invert: bool,

    /// Opaque background instead of a transparent one.
    #[arg(long, env = "SCORERENDER_OPAQUE")]
    opaque: bool,

    /// Reject fragments longer than this many bytes (0 = unlimited).
    #[arg(long, env = "SCORERENDER_MAX_LENGTH", default_value_t = 0)]
    max_length: usize,

    /// Keep each render's temporary files for inspection.
    #[arg(long, env = "SCORERENDER_KEEP_TEMP")]
    keep_temp: bool,

    /// Kill an external program after this many seconds.
    #[arg(long, env = "SCORERENDER_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// What to show for a fragment that failed to render.
    #[arg(long, env = "SCORERENDER_ON_ERROR", value_enum, default_value = "message")]
    on_error: OnErrorArg,

    /// Print JSON records instead of file names.
    #[arg(long, env = "SCORERENDER_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SCORERENDER_NO_PROGRESS")]
    no_progress: bool,

    /// Probe the configured programs and exit.
    #[arg(long)]
    check: bool,

    /// Enable DEBUG-level tracing logs; with --on-error message, also print
    /// the failing program's output.
    #[arg(short, long, env = "SCORERENDER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCORERENDER_QUIET")]
    quiet: bool,
}

/// Error-display policy for failed renders.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OnErrorArg {
    /// The error message (plus program output with --verbose).
    Message,
    /// The original fragment, unrendered.
    Fragment,
    /// Nothing at all.
    Nothing,
}

/// One line of `--json` output.
#[derive(Serialize)]
struct Record<'a> {
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<&'a RenderOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorRecord>,
}

#[derive(Serialize)]
struct ErrorRecord {
    /// Absent when the input could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<ErrorCode>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_output: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && cli.inputs.len() > 1;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Programs ─────────────────────────────────────────────────────────
    let mut programs = explicit_programs(&cli);
    health::discover_programs(&NotationRegistry::with_builtin(), &mut programs);
    let convert_bin = cli
        .convert
        .clone()
        .or_else(|| health::locate_program("convert"))
        .unwrap_or_else(|| PathBuf::from("/usr/bin/convert"));
    let registry = build_registry(&programs)?;

    // ── Check mode ───────────────────────────────────────────────────────
    if cli.check {
        let convert_ok = health::imagemagick_usable(&convert_bin);
        let report = health::check_notations(&registry, &programs);
        print_check(&cli, &convert_bin, convert_ok, &report)?;
        if !convert_ok || report.iter().all(|h| !h.is_usable()) {
            std::process::exit(1);
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress = if show_progress {
        Some(CliProgressCallback::new(cli.inputs.len()))
    } else {
        None
    };

    let mut builder = RenderConfig::builder()
        .cache_dir(&cli.cache_dir)
        .convert_bin(convert_bin)
        .programs(programs)
        .image_max_width(cli.width)
        .invert(cli.invert)
        .transparent(!cli.opaque)
        .content_max_length(cli.max_length)
        .keep_artifacts(cli.keep_temp);
    if let Some(ref dir) = cli.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.stage_timeout(Duration::from_secs(secs));
    }
    if let Some(ref cb) = progress {
        builder = builder.progress_callback(cb.clone() as ProgressCallback);
    }
    let config = builder.build().context("Invalid configuration")?;
    let renderer = Renderer::new(config, registry);

    // ── Render ───────────────────────────────────────────────────────────
    let mut failures = 0usize;
    let mut outputs = Vec::new();

    for input in &cli.inputs {
        let (notation, fragment) = match load_input(input, cli.notation.as_deref()) {
            Ok(loaded) => loaded,
            Err(e) => {
                failures += 1;
                if let Some(ref cb) = progress {
                    cb.on_input_error(input, &format!("{e:#}"));
                } else if !cli.json && cli.on_error != OnErrorArg::Nothing {
                    eprintln!("{} {}: {:#}", red("✗"), input.display(), e);
                }
                outputs.push((input.display().to_string(), Err(Failure::Input(e))));
                continue;
            }
        };
        let request = renderer.config().request(notation, fragment.clone());

        match renderer.render_async(request).await {
            Ok(output) => {
                if !cli.json {
                    println!("{}", output.file_name);
                }
                outputs.push((input.display().to_string(), Ok(output)));
            }
            Err(e) => {
                failures += 1;
                if !cli.json {
                    report_failure(&cli, input, &fragment, &e);
                }
                outputs.push((input.display().to_string(), Err(Failure::Render(e))));
            }
        }
    }

    if let Some(ref cb) = progress {
        cb.finish();
    }

    if cli.json {
        let mut records = Vec::with_capacity(outputs.len());
        for (input, result) in &outputs {
            records.push(match result {
                Ok(output) => {
                    let dims = output.dimensions();
                    Record {
                        input: input.clone(),
                        output: Some(output),
                        width: dims.map(|d| d.0),
                        height: dims.map(|d| d.1),
                        error: None,
                    }
                }
                Err(failure) => Record {
                    input: input.clone(),
                    output: None,
                    width: None,
                    height: None,
                    error: Some(failure.record()),
                },
            });
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&records).context("Failed to serialise output")?
        );
    }

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Why one input produced no image.
enum Failure {
    /// Unreadable file, or no notation could be determined.
    Input(anyhow::Error),
    Render(RenderError),
}

impl Failure {
    fn record(&self) -> ErrorRecord {
        match self {
            Failure::Input(e) => ErrorRecord {
                code: None,
                message: format!("{e:#}"),
                command_output: None,
            },
            Failure::Render(e) => ErrorRecord {
                code: Some(e.code()),
                message: e.to_string(),
                command_output: e.command_output().map(str::to_string),
            },
        }
    }
}

/// Program paths given on the command line.
fn explicit_programs(cli: &Cli) -> ProgramPaths {
    [
        (LILYPOND_BIN, &cli.lilypond),
        (MUP_BIN, &cli.mup),
        (MUP_MAGIC_FILE, &cli.mup_magic_file),
        (PMW_BIN, &cli.pmw),
        (LATEX_BIN, &cli.latex),
        (DVIPS_BIN, &cli.dvips),
    ]
    .into_iter()
    .filter_map(|(key, path)| path.clone().map(|p| (key.to_string(), p)))
    .collect()
}

/// Built-in notations, with LilyPond's flags matched to the installed version.
fn build_registry(programs: &ProgramPaths) -> Result<NotationRegistry> {
    let lilypond = match programs
        .get(LILYPOND_BIN)
        .and_then(|p| health::lilypond_version(p))
    {
        Some(version) => LilyPond::with_version(version),
        None => LilyPond::new(),
    };

    let mut registry = NotationRegistry::new();
    registry.register(Arc::new(lilypond))?;
    registry.register(Arc::new(Mup::new()))?;
    registry.register(Arc::new(Pmw::new()))?;
    registry.register(Arc::new(Latex::new()))?;
    Ok(registry)
}

/// Notation id and fragment text for one input.
fn load_input(input: &Path, notation: Option<&str>) -> Result<(String, String)> {
    let notation = match notation {
        Some(n) => n.to_string(),
        None => infer_notation(input)?,
    };
    Ok((notation, read_input(input)?))
}

fn read_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read fragment from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read fragment from {}", input.display()))
    }
}

fn infer_notation(input: &Path) -> Result<String> {
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let id = match ext.as_deref() {
        Some("ly") => "lilypond",
        Some("mup") => "mup",
        Some("pmw") => "pmw",
        Some("tex") => "latex",
        _ => bail!(
            "Cannot infer the notation of '{}'; pass --notation",
            input.display()
        ),
    };
    Ok(id.to_string())
}

/// Apply the `--on-error` policy.
fn report_failure(cli: &Cli, input: &Path, fragment: &str, error: &RenderError) {
    match cli.on_error {
        OnErrorArg::Message => {
            eprintln!("{} {}: [{}] {}", red("✗"), input.display(), error.code(), error);
            if cli.verbose {
                if let Some(output) = error.command_output().filter(|o| !o.is_empty()) {
                    eprintln!("{}", dim(output.trim_end()));
                }
            }
        }
        OnErrorArg::Fragment => println!("{fragment}"),
        OnErrorArg::Nothing => {}
    }
}

fn print_check(
    cli: &Cli,
    convert_bin: &Path,
    convert_ok: bool,
    report: &[NotationHealth],
) -> Result<()> {
    if cli.json {
        #[derive(Serialize)]
        struct CheckReport<'a> {
            convert: &'a Path,
            convert_usable: bool,
            notations: &'a [NotationHealth],
        }
        let json = serde_json::to_string_pretty(&CheckReport {
            convert: convert_bin,
            convert_usable: convert_ok,
            notations: report,
        })
        .context("Failed to serialise check report")?;
        println!("{json}");
        return Ok(());
    }

    let mark = |ok: bool| if ok { green("✓") } else { red("✗") };
    println!("{} ImageMagick  {}", mark(convert_ok), dim(&convert_bin.display().to_string()));
    for health in report {
        println!("{} {}", mark(health.is_usable()), bold(&health.name));
        for problem in &health.problems {
            println!("    {}  {}", problem.key, red(&problem.reason));
        }
    }
    Ok(())
}
