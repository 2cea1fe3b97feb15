use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use lmr_domain::error::{Error, Result};

/// Serialize `value` as pretty JSON and write it to `path` atomically:
/// write to a uniquely-named `.tmp` sibling, flush and sync, then rename
/// into place. The target is never observed half-written.
pub async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    );
    let tmp_path = path.with_file_name(tmp_name);

    let body = serde_json::to_vec_pretty(value)?;

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(&body).await?;
    file.flush().await?;
    file.sync_data().await?;
    drop(file);

    fs::rename(&tmp_path, path).await.map_err(|e| {
        let tmp = tmp_path.clone();
        tokio::spawn(async move {
            let _ = fs::remove_file(&tmp).await;
        });
        Error::Io(e)
    })?;

    Ok(())
}

/// Reads and deserializes `path` as JSON, returning `default()` if the file
/// does not exist yet (first run).
pub async fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(Error::Io(e)),
    }
}
