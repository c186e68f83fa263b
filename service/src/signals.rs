//! Process-termination signal handling: SIGINT/SIGTERM on Unix, Ctrl-C on
//! Windows, both resolving the same `Terminate::recv` future so `main.rs`
//! doesn't need platform branches at the call site.

#[cfg(any(target_os = "linux", target_os = "macos"))]
#[path = "signals/unix.rs"]
mod platform;
#[cfg(target_os = "windows")]
#[path = "signals/windows.rs"]
mod platform;

pub use platform::Terminate;
