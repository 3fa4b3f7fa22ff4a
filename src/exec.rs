//! Bounded external command execution (docker compose, pgrep, docker inspect).

use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use wait_timeout::ChildExt;

#[derive(Debug, Default)]
pub struct ExecRequest {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    timeout: Option<Duration>,
    capture_output: bool,
}

impl ExecRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }
}

#[derive(Debug)]
pub struct ExecOutput {
    pub status: ExitStatus,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run `request` to completion. A zero timeout waits indefinitely; an elapsed timeout
/// kills the child and returns an error.
pub fn run(request: ExecRequest, default_timeout: Duration) -> Result<ExecOutput> {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args);
    if let Some(cwd) = &request.cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in &request.env {
        cmd.env(k, v);
    }
    cmd.stdin(Stdio::null());
    if request.capture_output {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    tracing::debug!(program = ?request.program, args = ?request.args, "exec");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {:?}", request.program))?;
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let timeout = request.timeout.unwrap_or(default_timeout);
    let started = Instant::now();
    let status = if timeout.is_zero() {
        child.wait().context("failed to wait for process")?
    } else {
        match child
            .wait_timeout(timeout)
            .context("failed to wait with timeout")?
        {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(
                    "command {:?} timed out after {:?}",
                    request.program,
                    timeout
                ));
            }
        }
    };

    let stdout = read_stream(stdout_pipe.as_mut())?;
    let stderr = read_stream(stderr_pipe.as_mut())?;
    Ok(ExecOutput {
        status,
        duration: started.elapsed(),
        stdout,
        stderr,
    })
}

fn read_stream(stream: Option<&mut impl Read>) -> Result<String> {
    let mut buf = String::new();
    if let Some(reader) = stream {
        reader
            .read_to_string(&mut buf)
            .context("failed to read process output")?;
    }
    Ok(buf)
}
