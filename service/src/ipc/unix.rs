//! Unix domain socket transport for the IPC endpoint (Linux, macOS), with
//! access restricted by filesystem permissions on the socket file.

use std::{os::unix::fs::PermissionsExt as _, path::Path};

use anyhow::{Context, Result};
use tokio::net::{UnixListener, UnixStream};

pub(crate) struct IpcServer {
    listener: UnixListener,
}

pub(crate) type IpcStream = UnixStream;

impl IpcServer {
    pub(crate) async fn bind(sock_path: &Path) -> Result<Self> {
        if let Some(parent) = sock_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // A previous run's socket left on disk would otherwise make bind fail.
        tokio::fs::remove_file(sock_path).await.ok();

        let listener = UnixListener::bind(sock_path)
            .with_context(|| format!("Failed to bind Unix socket at {}", sock_path.display()))?;

        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(sock_path, perms)
            .await
            .context("Failed to set Unix socket permissions")?;

        Ok(Self { listener })
    }

    pub(crate) async fn next_client(&mut self) -> Result<IpcStream> {
        let (stream, _) = self.listener.accept().await.context("Failed to accept IPC client")?;
        Ok(stream)
    }
}
