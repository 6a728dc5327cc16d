//! Civitai model-version metadata.

use serde::Deserialize;
use std::path::PathBuf;

use super::{safe_relative, RemoteFile};
use crate::checksum;
use crate::transport::TransferError;

#[derive(Debug, Deserialize)]
struct ModelVersion {
    #[serde(default)]
    files: Vec<VersionFile>,
}

#[derive(Debug, Deserialize)]
struct VersionFile {
    name: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    hashes: Hashes,
    #[serde(rename = "downloadUrl", default)]
    download_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Hashes {
    #[serde(rename = "SHA256", default)]
    sha256: Option<String>,
}

pub(super) fn metadata_url(base: &str, version_id: &str) -> String {
    format!("{}/api/v1/model-versions/{}", base, version_id)
}

pub(super) fn download_url(base: &str, version_id: &str) -> String {
    format!(
        "{}/api/download/models/{}?type=Model&format=SafeTensor",
        base, version_id
    )
}

/// `civitai/<version>/<file>` under the staging root.
fn staged_path(version_id: &str, name: &str) -> PathBuf {
    PathBuf::from("civitai").join(version_id).join(name)
}

/// Pick the primary file (else the first) from a model-version document.
pub(super) fn parse_version(
    body: &[u8],
    base: &str,
    version_id: &str,
) -> Result<RemoteFile, TransferError> {
    let version: ModelVersion = serde_json::from_slice(body)
        .map_err(|e| TransferError::Metadata(format!("model version {}: {}", version_id, e)))?;
    let mut files = version.files;
    let idx = files.iter().position(|f| f.primary).unwrap_or(0);
    if files.is_empty() {
        return Err(TransferError::Metadata(format!(
            "model version {} lists no files",
            version_id
        )));
    }
    let file = files.swap_remove(idx);
    if !safe_relative(version_id) || version_id.contains('/') {
        return Err(TransferError::Metadata(format!(
            "unusable model version id {:?}",
            version_id
        )));
    }
    if !safe_relative(&file.name) || file.name.contains('/') {
        return Err(TransferError::Metadata(format!(
            "model version {} has unusable file name {:?}",
            version_id, file.name
        )));
    }
    let sha256 = file
        .hashes
        .sha256
        .as_deref()
        .filter(|h| checksum::is_sha256_hex(h))
        .map(checksum::normalize);
    Ok(RemoteFile {
        // Versions are staged apart; two of them may ship the same file name.
        relative_path: staged_path(version_id, &file.name),
        url: file
            .download_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| download_url(base, version_id)),
        name: file.name,
        size: None,
        sha256,
    })
}
