//! Child processes: command templating, launch with output forwarding, setup
//! commands, and graceful stop.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use super::{ServiceKind, SupervisorError};

/// Substitutions applied to command arguments.
#[derive(Clone)]
pub struct Placeholders {
    pairs: Vec<(&'static str, String)>,
    /// Values replaced by `***` in logged command lines.
    secrets: Vec<String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Placeholders {
            pairs: Vec::new(),
            secrets: Vec::new(),
        }
    }

    pub fn set(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.pairs.push((key, value.into()));
        self
    }

    pub fn secret(mut self, key: &'static str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.secrets.push(value.clone());
        }
        self.pairs.push((key, value));
        self
    }

    pub fn expand(&self, arg: &str) -> String {
        let mut out = arg.to_string();
        for (key, value) in &self.pairs {
            out = out.replace(&format!("{{{}}}", key), value);
        }
        out
    }

    pub fn expand_all(&self, argv: &[String]) -> Vec<String> {
        argv.iter().map(|a| self.expand(a)).collect()
    }

    /// Command line for logs with secret values masked.
    pub fn redacted(&self, argv: &[String]) -> String {
        let mut line = argv.join(" ");
        for s in &self.secrets {
            line = line.replace(s.as_str(), "***");
        }
        line
    }
}

impl Default for Placeholders {
    fn default() -> Self {
        Self::new()
    }
}

fn build(argv: &[String]) -> Option<Command> {
    let (program, args) = argv.split_first()?;
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    Some(cmd)
}

/// Launch a long-running service and forward its output into the log.
pub(super) fn spawn_service(
    kind: ServiceKind,
    argv: &[String],
    cwd: Option<&Path>,
) -> Result<Child, SupervisorError> {
    let mut cmd = build(argv).ok_or(SupervisorError::EmptyCommand { service: kind })?;
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd.filter(|d| d.is_dir()) {
        cmd.current_dir(dir);
    }
    let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
        service: kind,
        source,
    })?;
    if let Some(out) = child.stdout.take() {
        tokio::spawn(forward_lines(kind, out, "stdout"));
    }
    if let Some(err) = child.stderr.take() {
        tokio::spawn(forward_lines(kind, err, "stderr"));
    }
    tracing::info!(service = %kind, pid = ?child.id(), "service started");
    Ok(child)
}

async fn forward_lines<R: AsyncRead + Unpin>(kind: ServiceKind, reader: R, stream: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(service = %kind, stream, "{}", line);
    }
}

/// Run a one-shot setup command to completion. Failures are returned, not fatal.
pub(super) async fn run_setup(
    kind: ServiceKind,
    argv: &[String],
    logged: &str,
    timeout: Duration,
) -> Result<(), String> {
    let mut cmd = build(argv).ok_or_else(|| "empty setup command".to_string())?;
    cmd.stdout(Stdio::null()).stderr(Stdio::piped()).kill_on_drop(true);
    tracing::debug!(service = %kind, "setup: {}", logged);
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(o)) => o,
        Ok(Err(e)) => return Err(format!("spawn failed: {}", e)),
        Err(_) => return Err(format!("timed out after {:?}", timeout)),
    };
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!("{} ({})", output.status, stderr.trim()))
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

/// SIGTERM, then wait up to `grace`; kill as a last resort. Returns true when
/// the child exited on its own.
pub(super) async fn stop_child(kind: ServiceKind, child: &mut Child, grace: Duration) -> bool {
    if let Ok(Some(status)) = child.try_wait() {
        tracing::debug!(service = %kind, %status, "already exited");
        return true;
    }
    if send_sigterm(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(service = %kind, %status, "stopped");
                return true;
            }
            Ok(Err(e)) => tracing::warn!(service = %kind, "wait failed: {}", e),
            Err(_) => tracing::warn!(
                service = %kind,
                "did not exit within {:?} of SIGTERM; killing",
                grace
            ),
        }
    }
    if let Err(e) = child.kill().await {
        tracing::warn!(service = %kind, "kill failed: {}", e);
    }
    false
}

/// Wait until nothing accepts connections on `port`, up to `timeout`.
pub(super) async fn wait_port_free(port: u16, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let connect = tokio::net::TcpStream::connect(("127.0.0.1", port));
        match tokio::time::timeout(Duration::from_millis(500), connect).await {
            Ok(Err(_)) => return true,
            Ok(Ok(_)) | Err(_) => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
