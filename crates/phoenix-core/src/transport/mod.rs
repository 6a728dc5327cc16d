//! HTTP transport seam.
//!
//! Everything that talks to the network (registry metadata, file transfers,
//! reachability and health probes) goes through [`Transport`], so tests can
//! substitute a counting or scripted implementation. The production
//! implementation is [`CurlTransport`] (libcurl, blocking; call from
//! `spawn_blocking` when used from async code).

mod http;
mod error;

pub use http::CurlTransport;
pub use error::TransferError;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Request headers as name → value.
pub type Headers = HashMap<String, String>;

/// Shared abort token checked by transfers and backoff sleeps.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub trait Transport: Send + Sync {
    /// GET `url` and return the body. Non-2xx responses are `TransferError::Http`.
    fn get(&self, url: &str, headers: &Headers) -> Result<Vec<u8>, TransferError>;

    /// GET `url` into `dest` (created or truncated). Returns bytes written.
    /// Stops with `TransferError::Aborted` once `abort` is requested.
    fn download(
        &self,
        url: &str,
        headers: &Headers,
        dest: &Path,
        abort: &AbortFlag,
    ) -> Result<u64, TransferError>;

    /// Request `url` with a short timeout and return the HTTP status, whatever it is.
    fn probe(&self, url: &str, timeout: Duration) -> Result<u32, TransferError>;
}

/// Authorization header for a bearer token, if any.
pub fn bearer(token: Option<&str>) -> Headers {
    let mut headers = Headers::new();
    if let Some(t) = token {
        headers.insert("Authorization".to_string(), format!("Bearer {}", t));
    }
    headers
}
