//! Optional extra plugins for the inference application, cloned from git.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

#[derive(Debug, Default)]
pub struct PluginReport {
    pub installed: Vec<String>,
    pub present: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Directory name for a source URL: its last path segment without `.git`.
pub fn plugin_name(source: &str) -> Option<String> {
    let trimmed = source.trim().trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then(|| name.to_string())
}

pub fn custom_nodes_dir(app_dir: &Path) -> PathBuf {
    app_dir.join("custom_nodes")
}

/// Shallow-clone every source not already present. Each failure is recorded, not fatal.
pub async fn install_all(sources: &[String], custom_nodes: &Path, timeout: Duration) -> PluginReport {
    let mut report = PluginReport::default();
    if sources.is_empty() {
        return report;
    }
    if let Err(e) = tokio::fs::create_dir_all(custom_nodes).await {
        for s in sources {
            report.failed.push((s.clone(), format!("create {}: {}", custom_nodes.display(), e)));
        }
        return report;
    }
    for source in sources {
        let Some(name) = plugin_name(source) else {
            tracing::warn!(source = %source, "cannot derive a plugin name; skipping");
            report.failed.push((source.clone(), "unusable source".to_string()));
            continue;
        };
        let dest = custom_nodes.join(&name);
        if dest.exists() {
            tracing::info!(plugin = %name, "already installed");
            report.present.push(name);
            continue;
        }
        match clone(source, &dest, timeout).await {
            Ok(()) => {
                tracing::info!(plugin = %name, "installed");
                report.installed.push(name);
            }
            Err(e) => {
                tracing::warn!(plugin = %name, "install failed: {}", e);
                let _ = tokio::fs::remove_dir_all(&dest).await;
                report.failed.push((source.clone(), e));
            }
        }
    }
    report
}

async fn clone(source: &str, dest: &Path, timeout: Duration) -> Result<(), String> {
    let mut cmd = Command::new("git");
    cmd.args(["clone", "--depth", "1", "--quiet", source])
        .arg(dest)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(out)) if out.status.success() => Ok(()),
        Ok(Ok(out)) => Err(format!(
            "git exited with {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )),
        Ok(Err(e)) => Err(format!("spawn git: {}", e)),
        Err(_) => Err(format!("timed out after {:?}", timeout)),
    }
}
