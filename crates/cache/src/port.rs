use lmr_domain::error::{Error, Result};

/// Binds an ephemeral TCP port on loopback and immediately releases it,
/// race-tolerant: the caller should retry on a subsequent bind failure
/// (another process may win the same port before the child binds it).
pub async fn choose_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| Error::SpawnFailed(format!("allocating ephemeral port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::SpawnFailed(format!("reading ephemeral port: {e}")))?
        .port();
    drop(listener);
    Ok(port)
}
