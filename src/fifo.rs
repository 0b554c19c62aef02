//! Named pipe the instrumented process can write its allocation log into.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::debug;

/// Replaces whatever is at `path` with a fresh FIFO readable only by us.
pub fn create(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed previous log"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
    if unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
