use anyhow::Result;
use futures::{
    future::poll_fn,
    task::{Context, Poll},
};
use tokio::signal::unix::{signal, Signal, SignalKind};

pub(crate) struct Terminate {
    sigint: Signal,
    sigterm: Signal,
}

impl Terminate {
    pub(crate) fn new() -> Result<Self> {
        let sigint = signal(SignalKind::interrupt())?;
        let sigterm = signal(SignalKind::terminate())?;

        Ok(Self { sigint, sigterm })
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if self.sigint.poll_recv(cx).is_ready() {
            Poll::Ready(())
        } else if self.sigterm.poll_recv(cx).is_ready() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    /// Waits for SIGINT or SIGTERM.
    pub(crate) async fn recv(&mut self) {
        poll_fn(|cx| self.poll_recv(cx)).await
    }
}
