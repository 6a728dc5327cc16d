//! libcurl-backed [`Transport`].

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use curl::easy::{Easy, List};

use super::{AbortFlag, Headers, TransferError, Transport};
use crate::config::TimeoutConfig;

/// Bound for metadata GETs (registry JSON).
const METADATA_TIMEOUT: Duration = Duration::from_secs(120);

/// Blocking curl transport. Cheap to clone; each call uses a fresh handle.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    connect_timeout: Duration,
    transfer_timeout: Duration,
    /// Abort when slower than this many bytes/s for `low_speed_time`.
    low_speed_limit: u32,
    low_speed_time: Duration,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self::from_timeouts(&TimeoutConfig::default())
    }
}

impl CurlTransport {
    pub fn from_timeouts(t: &TimeoutConfig) -> Self {
        CurlTransport {
            connect_timeout: Duration::from_secs(t.connect_secs.max(1)),
            transfer_timeout: Duration::from_secs(t.transfer_secs.max(1)),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
        }
    }

    fn handle(&self, url: &str, headers: &Headers) -> Result<Easy, TransferError> {
        let mut easy = Easy::new();
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.connect_timeout(self.connect_timeout)?;
        easy.useragent(concat!("phoenix/", env!("CARGO_PKG_VERSION")))?;

        let mut list = List::new();
        for (k, v) in headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))?;
        }
        if !headers.is_empty() {
            easy.http_headers(list)?;
        }
        Ok(easy)
    }
}

fn check_status(easy: &mut Easy) -> Result<u32, TransferError> {
    let code = easy.response_code()?;
    if !(200..300).contains(&code) {
        return Err(TransferError::Http(code));
    }
    Ok(code)
}

impl Transport for CurlTransport {
    fn get(&self, url: &str, headers: &Headers) -> Result<Vec<u8>, TransferError> {
        let mut easy = self.handle(url, headers)?;
        easy.timeout(METADATA_TIMEOUT)?;
        let mut body = Vec::new();
        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.perform()?;
        }
        check_status(&mut easy)?;
        Ok(body)
    }

    fn download(
        &self,
        url: &str,
        headers: &Headers,
        dest: &Path,
        abort: &AbortFlag,
    ) -> Result<u64, TransferError> {
        if abort.is_requested() {
            return Err(TransferError::Aborted);
        }
        let mut file = File::create(dest)?;
        let mut easy = self.handle(url, headers)?;
        easy.low_speed_limit(self.low_speed_limit)?;
        easy.low_speed_time(self.low_speed_time)?;
        easy.timeout(self.transfer_timeout)?;
        easy.progress(true)?;

        let mut written: u64 = 0;
        let mut write_error: Option<io::Error> = None;
        let performed = {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| match file.write_all(data) {
                Ok(()) => {
                    written += data.len() as u64;
                    Ok(data.len())
                }
                Err(e) => {
                    tracing::warn!("download write failed: {}", e);
                    write_error = Some(e);
                    Ok(0) // abort transfer
                }
            })?;
            transfer.progress_function(|_, _, _, _| !abort.is_requested())?;
            transfer.perform()
        };

        if let Some(e) = write_error {
            return Err(TransferError::Storage(e));
        }
        if let Err(e) = performed {
            if e.is_aborted_by_callback() || abort.is_requested() {
                return Err(TransferError::Aborted);
            }
            return Err(TransferError::Curl(e));
        }
        check_status(&mut easy)?;

        let announced = easy.content_length_download()?;
        if announced >= 0.0 && announced as u64 != written {
            return Err(TransferError::PartialTransfer {
                expected: announced as u64,
                received: written,
            });
        }
        file.flush()?;
        file.sync_all()?;
        Ok(written)
    }

    fn probe(&self, url: &str, timeout: Duration) -> Result<u32, TransferError> {
        let mut easy = Easy::new();
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.connect_timeout(timeout)?;
        easy.timeout(timeout)?;
        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| Ok(data.len()))?;
            transfer.perform()?;
        }
        Ok(easy.response_code()?)
    }
}
