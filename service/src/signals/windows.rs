use anyhow::Result;

pub(crate) struct Terminate {
    ctrl_c: tokio::signal::windows::CtrlC,
}

impl Terminate {
    pub(crate) fn new() -> Result<Self> {
        let ctrl_c = tokio::signal::windows::ctrl_c()?;
        Ok(Self { ctrl_c })
    }

    /// Waits for Ctrl-C or a service-stop request.
    pub(crate) async fn recv(&mut self) {
        self.ctrl_c.recv().await;
    }
}
