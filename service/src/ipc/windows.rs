//! Named pipe transport for the IPC endpoint on Windows: no filesystem
//! path, a single named pipe per process, re-created for every accepted
//! client.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::windows::named_pipe::{self, NamedPipeServer};

const PIPE_NAME: &str = r"\\.\pipe\SdfwServicePipe";
const NUM_BIND_RETRIES: usize = 10;

pub(crate) struct IpcServer {
    pipe_name: String,
}

pub(crate) type IpcStream = NamedPipeServer;

impl IpcServer {
    pub(crate) async fn bind(_sock_path: &std::path::Path) -> Result<Self> {
        Ok(Self {
            pipe_name: PIPE_NAME.to_owned(),
        })
    }

    pub(crate) async fn next_client(&mut self) -> Result<IpcStream> {
        // Closing and immediately reopening a named pipe can race Windows'
        // own cleanup of the previous instance.
        tokio::task::yield_now().await;

        let server = self.create_pipe_server().await?;
        server
            .connect()
            .await
            .context("Failed to accept IPC connection over named pipe")?;
        Ok(server)
    }

    async fn create_pipe_server(&self) -> Result<NamedPipeServer> {
        for attempt in 0..NUM_BIND_RETRIES {
            match named_pipe::ServerOptions::new()
                .first_pipe_instance(attempt == 0)
                .create(&self.pipe_name)
            {
                Ok(server) => return Ok(server),
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    tracing::warn!(attempt, "Named pipe busy, retrying");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Err(e) => return Err(e).context("Failed to create named pipe server"),
            }
        }

        bail!("Exhausted retries binding named pipe {}", self.pipe_name)
    }
}
