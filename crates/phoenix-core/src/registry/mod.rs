//! Remote registries: turning an [`AssetSpec`] into concrete downloadable files.
//!
//! Hosted models (Civitai) resolve to exactly one file through the
//! model-version API. Registry repositories (Hugging Face) resolve to every
//! recognized model file in the repository listing.

mod civitai;
mod huggingface;

use std::path::PathBuf;

use crate::asset::{AssetSource, AssetSpec};
use crate::config::RegistryConfig;
use crate::credentials::RegistryCredentials;
use crate::transport::{bearer, Headers, TransferError, Transport};

/// One concrete file a spec resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Final file name.
    pub name: String,
    /// Location under the staging directory.
    pub relative_path: PathBuf,
    pub url: String,
    /// Exact size when the registry reports one.
    pub size: Option<u64>,
    /// Lowercase SHA-256 when the registry reports one.
    pub sha256: Option<String>,
}

pub struct RegistryClient {
    civitai_base: String,
    huggingface_base: String,
    credentials: RegistryCredentials,
}

impl RegistryClient {
    pub fn new(cfg: &RegistryConfig, credentials: RegistryCredentials) -> Self {
        RegistryClient {
            civitai_base: cfg.civitai_base.trim_end_matches('/').to_string(),
            huggingface_base: cfg.huggingface_base.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn has_token(&self, source: AssetSource) -> bool {
        match source {
            AssetSource::RegistryRepo => self.credentials.huggingface.is_some(),
            AssetSource::HostedModel => self.credentials.civitai.is_some(),
        }
    }

    /// Auth headers for requests against `source`.
    pub fn headers(&self, source: AssetSource) -> Headers {
        let token = match source {
            AssetSource::RegistryRepo => self.credentials.huggingface.as_ref(),
            AssetSource::HostedModel => self.credentials.civitai.as_ref(),
        };
        bearer(token.map(|s| s.expose()))
    }

    /// Log which registries have credentials. Never logs the tokens.
    pub fn log_token_presence(&self) {
        for source in [AssetSource::RegistryRepo, AssetSource::HostedModel] {
            if self.has_token(source) {
                tracing::debug!(registry = %source, "using provided token");
            } else {
                tracing::info!(registry = %source, "no token provided; only public assets are reachable");
            }
        }
    }

    /// Fetch metadata for `spec` and list its files.
    pub fn resolve(
        &self,
        transport: &dyn Transport,
        spec: &AssetSpec,
    ) -> Result<Vec<RemoteFile>, TransferError> {
        let headers = self.headers(spec.source);
        match spec.source {
            AssetSource::HostedModel => {
                let url = civitai::metadata_url(&self.civitai_base, &spec.identifier);
                tracing::debug!("fetching metadata from {}", url);
                let body = transport.get(&url, &headers)?;
                let file = civitai::parse_version(&body, &self.civitai_base, &spec.identifier)?;
                Ok(vec![file])
            }
            AssetSource::RegistryRepo => {
                let url = huggingface::metadata_url(&self.huggingface_base, &spec.identifier)?;
                tracing::debug!("fetching metadata from {}", url);
                let body = transport.get(&url, &headers)?;
                huggingface::parse_listing(&body, &self.huggingface_base, &spec.identifier)
            }
        }
    }
}

/// Reject names that would escape the staging directory.
fn safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}
