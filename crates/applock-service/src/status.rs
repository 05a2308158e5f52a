use anyhow::Result;
use applock_core::supervisor::Supervisor;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[cfg(not(unix))]
use anyhow::anyhow;
#[cfg(unix)]
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
};
#[cfg(unix)]
use tracing::warn;

/// Serve one JSON [`SupervisorStatus`](applock_core::SupervisorStatus)
/// snapshot per connection on a local Unix domain socket.
#[cfg(unix)]
pub fn spawn_status_server(supervisor: Arc<Supervisor>, socket_path: &Path) -> Result<JoinHandle<()>> {
    if socket_path.exists() {
        let _ = std::fs::remove_file(socket_path);
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    use std::os::unix::fs::PermissionsExt;
    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;

    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut stream, _)) => {
                    if let Ok(bytes) = serde_json::to_vec(&supervisor.status()) {
                        let _ = stream.write_all(&bytes).await;
                    }
                    let _ = stream.shutdown().await;
                }
                Err(err) => {
                    warn!(error = %err, "status socket accept failed");
                    break;
                }
            }
        }
    });

    Ok(task)
}

#[cfg(not(unix))]
pub fn spawn_status_server(_: Arc<Supervisor>, _: &Path) -> Result<JoinHandle<()>> {
    Err(anyhow!(
        "status server is only available on unix via UDS transport"
    ))
}

/// Read the snapshot a running service publishes on `socket_path`.
#[cfg(unix)]
pub async fn fetch_status(socket_path: &Path) -> Result<serde_json::Value> {
    let mut stream = UnixStream::connect(socket_path).await?;
    let mut body = Vec::new();
    stream.read_to_end(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(not(unix))]
pub async fn fetch_status(_: &Path) -> Result<serde_json::Value> {
    Err(anyhow!("status is only available on unix via UDS transport"))
}
