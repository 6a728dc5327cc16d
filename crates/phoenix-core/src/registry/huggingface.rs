//! Hugging Face repository listings.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use super::{safe_relative, RemoteFile};
use crate::checksum;
use crate::classify::is_model_file;
use crate::transport::TransferError;

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    lfs: Option<Lfs>,
}

#[derive(Debug, Deserialize)]
struct Lfs {
    sha256: String,
    size: u64,
}

fn endpoint(base: &str, segments: &[&str]) -> Result<Url, TransferError> {
    let mut url =
        Url::parse(base).map_err(|e| TransferError::Metadata(format!("bad base {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| TransferError::Metadata(format!("base {} cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(super) fn metadata_url(base: &str, repo: &str) -> Result<String, TransferError> {
    let mut segments = vec!["api", "models"];
    segments.extend(repo.split('/'));
    let mut url = endpoint(base, &segments)?;
    url.set_query(Some("blobs=true"));
    Ok(url.into())
}

pub(super) fn resolve_url(base: &str, repo: &str, rfilename: &str) -> Result<String, TransferError> {
    let mut segments: Vec<&str> = repo.split('/').collect();
    segments.extend(["resolve", "main"]);
    segments.extend(rfilename.split('/'));
    Ok(endpoint(base, &segments)?.into())
}

/// Every recognized model file in the listing, staged under `<repo>/<rfilename>`.
pub(super) fn parse_listing(
    body: &[u8],
    base: &str,
    repo: &str,
) -> Result<Vec<RemoteFile>, TransferError> {
    let info: RepoInfo = serde_json::from_slice(body)
        .map_err(|e| TransferError::Metadata(format!("repo {}: {}", repo, e)))?;
    let mut files = Vec::new();
    for sib in info.siblings {
        if !is_model_file(Path::new(&sib.rfilename)) {
            continue;
        }
        if !safe_relative(&sib.rfilename) {
            tracing::warn!(repo, file = %sib.rfilename, "skipping file with unsafe path");
            continue;
        }
        let name = sib
            .rfilename
            .rsplit('/')
            .next()
            .unwrap_or(&sib.rfilename)
            .to_string();
        let (size, sha256) = match sib.lfs {
            Some(lfs) if checksum::is_sha256_hex(&lfs.sha256) => {
                (Some(lfs.size), Some(checksum::normalize(&lfs.sha256)))
            }
            Some(lfs) => (Some(lfs.size), None),
            None => (sib.size, None),
        };
        files.push(RemoteFile {
            url: resolve_url(base, repo, &sib.rfilename)?,
            relative_path: PathBuf::from(repo).join(&sib.rfilename),
            name,
            size,
            sha256,
        });
    }
    if files.is_empty() {
        return Err(TransferError::Metadata(format!(
            "repo {} contains no recognized model files",
            repo
        )));
    }
    Ok(files)
}
