//! PID file management for daemon-style operation.
//!
//! On startup the server writes `<pid>\n<port>\n` to the configured path
//! and acquires an `fs2` exclusive lock on the file. If another instance
//! already holds the lock, startup fails immediately; a stale file left
//! behind by a process that died still unlocks cleanly, since the OS
//! releases the advisory lock when the holder exits. The lock (and file)
//! are released on shutdown via [`remove_pid_file`].

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;

/// Write `pid\nport\n` to `path` and acquire an exclusive lock.
///
/// Returns the open [`File`] handle — the caller **must** keep it alive for
/// the lifetime of the server so the advisory lock is held.
pub fn write_pid_file(path: &Path, port: u16) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Open without truncating: a second instance that loses the lock race
    // must never clobber the first instance's still-live pidfile content.
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("opening PID file {}: {e}", path.display()))?;

    file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!(
            "another lemonade-router instance is running (PID file {} is locked)",
            path.display()
        )
    })?;

    // Only now, with the lock confirmed held, is it safe to overwrite.
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;

    let pid = std::process::id();
    writeln!(file, "{pid}")?;
    writeln!(file, "{port}")?;
    file.flush()?;

    tracing::info!(path = %path.display(), pid, port, "PID file written");
    Ok(file)
}

/// Remove the PID file at `path`. The exclusive lock is released when
/// `_handle` is dropped, but removing the file too avoids a confusing
/// stale entry for anyone inspecting the state directory.
pub fn remove_pid_file(path: &Path, _handle: File) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_remove_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("test.pid");

        let handle = write_pid_file(&pid_path, 8000).unwrap();

        let content = fs::read_to_string(&pid_path).unwrap();
        let mut lines = content.lines();
        let stored_pid: u32 = lines.next().unwrap().parse().unwrap();
        let stored_port: u16 = lines.next().unwrap().parse().unwrap();
        assert_eq!(stored_pid, std::process::id());
        assert_eq!(stored_port, 8000);

        let second = write_pid_file(&pid_path, 9000);
        assert!(second.is_err(), "expected lock conflict");

        // The losing instance's failed open must not have clobbered the
        // first instance's still-live pidfile content.
        let content_after = fs::read_to_string(&pid_path).unwrap();
        assert_eq!(content_after, content, "losing writer corrupted the live pidfile");

        remove_pid_file(&pid_path, handle);
        assert!(!pid_path.exists());
    }

    #[test]
    fn creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("nested").join("dirs").join("router.pid");

        let handle = write_pid_file(&pid_path, 8000).unwrap();
        assert!(pid_path.exists());

        remove_pid_file(&pid_path, handle);
    }
}
