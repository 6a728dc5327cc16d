//! Free-space probe for the staging volume.

use std::io;
use std::path::Path;

/// Bytes available to unprivileged writers on the filesystem holding `path`.
/// Walks up to the nearest existing ancestor so a not-yet-created staging
/// directory can be checked.
#[cfg(unix)]
pub fn available_bytes(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let existing = path
        .ancestors()
        .find(|p| p.exists())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no existing ancestor"))?;
    let c_path = CString::new(existing.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let r = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if r != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

/// Non-Unix stub: no probe available, report unlimited space.
#[cfg(not(unix))]
pub fn available_bytes(_path: &Path) -> io::Result<u64> {
    Ok(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_space_for_missing_child() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("not/yet/created");
        let free = available_bytes(&nested).unwrap();
        assert!(free > 0);
    }
}
