use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use lmr_domain::error::{Error, Result};

use crate::traits::InstallOutcome;

/// A pinned engine release, compiled into the adapter rather than fetched
/// at runtime, so whether a reinstall is needed can be decided with no
/// network access.
#[derive(Debug, Clone, Copy)]
pub struct PinnedRelease {
    pub version: &'static str,
    /// `{version}` is substituted with `version` before the request.
    pub url_template: &'static str,
    pub binary_name: &'static str,
}

/// Idempotent install routine shared by every adapter: compares the pinned
/// version against `<install_dir>/version.txt`, and if they differ (or the
/// binary is missing), downloads the pinned release tarball, extracts it
/// into a scratch directory, and only then moves the binary into place.
///
/// On any failure the scratch directory is removed and `InstallFailed` is
/// returned; the previously-installed binary (if any) is left untouched.
pub async fn ensure_installed(install_dir: &Path, pinned: &PinnedRelease) -> Result<InstallOutcome> {
    let version_path = crate::traits::version_file(install_dir);
    let binary_path = install_dir.join(pinned.binary_name);

    if binary_path.exists() {
        if let Ok(current) = std::fs::read_to_string(&version_path) {
            if current.trim() == pinned.version {
                return Ok(InstallOutcome {
                    upgraded: false,
                    version: pinned.version.to_string(),
                });
            }
        }
    }

    std::fs::create_dir_all(install_dir)
        .map_err(|e| Error::InstallFailed(format!("creating install dir: {e}")))?;

    let scratch = tempfile::tempdir_in(install_dir)
        .map_err(|e| Error::InstallFailed(format!("creating scratch dir: {e}")))?;

    let result = download_and_extract(pinned, scratch.path()).await;
    let extracted = match result {
        Ok(dir) => dir,
        Err(e) => {
            // `scratch` is removed by its own `Drop` regardless; this just
            // makes the cleanup intent explicit at the call site.
            drop(scratch);
            return Err(e);
        }
    };

    let found = find_binary(&extracted, pinned.binary_name).ok_or_else(|| {
        Error::InstallFailed(format!(
            "extracted archive did not contain {}",
            pinned.binary_name
        ))
    })?;

    if binary_path.exists() {
        let _ = std::fs::remove_file(&binary_path);
    }
    std::fs::rename(&found, &binary_path)
        .or_else(|_| std::fs::copy(&found, &binary_path).map(|_| ()))
        .map_err(|e| Error::InstallFailed(format!("installing binary: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(&binary_path) {
            let mut perms = meta.permissions();
            perms.set_mode(perms.mode() | 0o111);
            let _ = std::fs::set_permissions(&binary_path, perms);
        }
    }

    std::fs::write(&version_path, pinned.version)
        .map_err(|e| Error::InstallFailed(format!("writing version marker: {e}")))?;

    Ok(InstallOutcome {
        upgraded: true,
        version: pinned.version.to_string(),
    })
}

async fn download_and_extract(pinned: &PinnedRelease, scratch: &Path) -> Result<PathBuf> {
    let url = pinned.url_template.replace("{version}", pinned.version);

    let response = reqwest::get(&url)
        .await
        .map_err(|e| Error::InstallFailed(format!("downloading {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(Error::InstallFailed(format!(
            "downloading {url}: HTTP {}",
            response.status()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::InstallFailed(format!("reading download body: {e}")))?;

    let extract_dir = scratch.join("extracted");
    std::fs::create_dir_all(&extract_dir)
        .map_err(|e| Error::InstallFailed(format!("creating extract dir: {e}")))?;

    let tar = GzDecoder::new(&bytes[..]);
    let mut archive = tar::Archive::new(tar);
    archive
        .unpack(&extract_dir)
        .map_err(|e| Error::InstallFailed(format!("extracting archive: {e}")))?;

    Ok(extract_dir)
}

fn find_binary(root: &Path, name: &str) -> Option<PathBuf> {
    for entry in walkdir_shallow(root) {
        if entry.file_name().and_then(|n| n.to_str()) == Some(name) {
            return Some(entry);
        }
    }
    None
}

/// A small recursive walk; avoids pulling `walkdir` into this crate purely
/// for a bounded-depth search under a just-extracted archive.
fn walkdir_shallow(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}
