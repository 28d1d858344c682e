//! Process execution: run external programs and capture what they print.
//!
//! Commands are described as data ([`CommandSpec`], [`CommandLine`]) and
//! handed to a [`ProcessRunner`]. The default [`SystemRunner`] spawns real
//! processes; tests substitute their own runner to count or script
//! invocations.
//!
//! ## Working directory
//!
//! The host process's working directory is never changed. A command that
//! depends on relative paths carries its own `current_dir`, which the runner
//! applies to the child only. This keeps concurrent renders in one process
//! from stepping on each other.
//!
//! ## Timeouts
//!
//! By default a command may run forever: a wedged program blocks the render
//! that started it. An optional timeout kills the whole pipeline and reports
//! [`io::ErrorKind::TimedOut`].

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn get_envs(&self) -> &[(OsString, OsString)] {
        &self.envs
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(self.program.as_os_str()))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

fn shell_quote(s: &OsStr) -> String {
    let s = s.to_string_lossy();
    if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        format!("'{}'", s.replace('\'', r"'\''"))
    } else {
        s.into_owned()
    }
}

/// One or more commands joined stdout → stdin, like a shell pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    commands: Vec<CommandSpec>,
}

impl CommandLine {
    pub fn new(first: CommandSpec) -> Self {
        Self {
            commands: vec![first],
        }
    }

    /// Feed the current pipeline's stdout into `next`.
    pub fn pipe(mut self, next: CommandSpec) -> Self {
        self.commands.push(next);
        self
    }

    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }
}

impl From<CommandSpec> for CommandLine {
    fn from(spec: CommandSpec) -> Self {
        CommandLine::new(spec)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cmd) in self.commands.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{cmd}")?;
        }
        Ok(())
    }
}

/// What a finished command line reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit status of the last command; `-1` when it was killed by a signal.
    pub status: i32,
    /// stdout of the last command followed by stderr of every command.
    pub output: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs command lines. Implementations must be usable from any thread.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, command: &CommandLine, timeout: Option<Duration>) -> io::Result<ProcessOutcome>;
}

/// Spawns real processes via [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &CommandLine, timeout: Option<Duration>) -> io::Result<ProcessOutcome> {
        let specs = command.commands();
        let mut children: Vec<Child> = Vec::with_capacity(specs.len());
        let mut stderr_readers: Vec<JoinHandle<Vec<u8>>> = Vec::with_capacity(specs.len());
        let mut stdout_reader: Option<JoinHandle<Vec<u8>>> = None;
        let mut upstream = None;

        for (i, spec) in specs.iter().enumerate() {
            let is_last = i + 1 == specs.len();
            let mut cmd = spec.to_command();
            cmd.stdin(match upstream.take() {
                Some(out) => Stdio::from(out),
                None => Stdio::null(),
            });
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    kill_all(&mut children);
                    return Err(e);
                }
            };

            if let Some(err) = child.stderr.take() {
                stderr_readers.push(drain(err));
            }
            if is_last {
                stdout_reader = child.stdout.take().map(drain);
            } else {
                upstream = child.stdout.take();
            }
            children.push(child);
        }

        let statuses = wait_all(&mut children, timeout)?;

        let mut output = Vec::new();
        if let Some(handle) = stdout_reader {
            output.extend(handle.join().unwrap_or_default());
        }
        for handle in stderr_readers {
            output.extend(handle.join().unwrap_or_default());
        }

        Ok(ProcessOutcome {
            status: statuses.last().copied().unwrap_or(-1),
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// The parts of a running child that reaping needs.
trait Reap {
    fn wait_code(&mut self) -> io::Result<i32>;
    fn try_wait_code(&mut self) -> io::Result<Option<i32>>;
    fn kill_and_reap(&mut self);
}

impl Reap for Child {
    fn wait_code(&mut self) -> io::Result<i32> {
        self.wait().map(exit_code)
    }

    fn try_wait_code(&mut self) -> io::Result<Option<i32>> {
        self.try_wait().map(|s| s.map(exit_code))
    }

    fn kill_and_reap(&mut self) {
        let _ = self.kill();
        let _ = self.wait();
    }
}

fn kill_all<C: Reap>(children: &mut [C]) {
    for child in children.iter_mut() {
        child.kill_and_reap();
    }
}

/// Wait for every child. On any error the children still running are
/// killed and reaped before the error is returned.
fn wait_all<C: Reap>(children: &mut [C], timeout: Option<Duration>) -> io::Result<Vec<i32>> {
    let Some(limit) = timeout else {
        let mut statuses = Vec::with_capacity(children.len());
        for i in 0..children.len() {
            match children[i].wait_code() {
                Ok(code) => statuses.push(code),
                Err(e) => {
                    kill_all(&mut children[i..]);
                    return Err(e);
                }
            }
        }
        return Ok(statuses);
    };

    let deadline = Instant::now() + limit;
    let mut statuses: Vec<Option<i32>> = vec![None; children.len()];
    loop {
        for i in 0..children.len() {
            if statuses[i].is_some() {
                continue;
            }
            match children[i].try_wait_code() {
                Ok(code) => statuses[i] = code,
                Err(e) => {
                    kill_all(children);
                    return Err(e);
                }
            }
        }
        if statuses.iter().all(Option::is_some) {
            return Ok(statuses.into_iter().flatten().collect());
        }
        if Instant::now() >= deadline {
            kill_all(children);
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("command did not finish within {:.1}s", limit.as_secs_f64()),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Runs commands for one render operation and remembers the last output.
pub struct Executor<'a> {
    runner: &'a dyn ProcessRunner,
    timeout: Option<Duration>,
    last_output: String,
    invocations: usize,
}

impl<'a> Executor<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, timeout: Option<Duration>) -> Self {
        Self {
            runner,
            timeout,
            last_output: String::new(),
            invocations: 0,
        }
    }

    /// Run `command` and return its exit status.
    ///
    /// The combined output replaces [`Executor::last_output`]. When the
    /// command cannot be spawned or times out, the error message is stored
    /// there instead.
    pub fn run(&mut self, command: &CommandLine) -> io::Result<i32> {
        self.invocations += 1;
        debug!("Running: {}", command);
        match self.runner.run(command, self.timeout) {
            Ok(outcome) => {
                debug!("Exit status {} ({} bytes of output)", outcome.status, outcome.output.len());
                self.last_output = outcome.output;
                Ok(outcome.status)
            }
            Err(e) => {
                self.last_output = format!("{}: {}", command, e);
                Err(e)
            }
        }
    }

    pub fn last_output(&self) -> &str {
        &self.last_output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.last_output)
    }

    /// Number of command lines started through this executor.
    pub fn invocations(&self) -> usize {
        self.invocations
    }
}
