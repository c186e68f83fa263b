//! An abstraction over well-known OS directories used to locate the
//! settings document, log directory, and IPC endpoint.
//!
//! The forwarder is a system-wide service (it takes over adapters that belong
//! to the whole machine, not just one user), so its settings document lives in
//! *shared* application data (`%ProgramData%` on Windows) rather than a
//! per-user `AppData` directory.

pub use imp::{config_dir, ipc_runtime_dir, log_dir};

const APP_DIR_NAME: &str = "Sdfw";

#[cfg(any(target_os = "linux", target_os = "macos"))]
mod imp {
    use super::APP_DIR_NAME;
    use std::path::PathBuf;

    /// `/var/lib/Sdfw` if writable by root, else falls back to the user's data dir.
    ///
    /// The Unix analogue of `%ProgramData%\Sdfw` on Windows: a directory any
    /// user of the service (normally root) can write to.
    pub fn config_dir() -> Option<PathBuf> {
        let system_wide = PathBuf::from("/var/lib").join(APP_DIR_NAME);
        if system_wide.parent().is_some_and(|p| p.exists()) {
            return Some(system_wide);
        }

        Some(dirs::data_local_dir()?.join(APP_DIR_NAME))
    }

    pub fn log_dir() -> Option<PathBuf> {
        Some(dirs::cache_dir()?.join(APP_DIR_NAME).join("logs"))
    }

    /// Directory the Unix-domain socket used for IPC lives in.
    pub fn ipc_runtime_dir() -> Option<PathBuf> {
        Some(dirs::runtime_dir().unwrap_or_else(std::env::temp_dir).join(APP_DIR_NAME))
    }
}

#[cfg(target_os = "windows")]
mod imp {
    use super::APP_DIR_NAME;
    use known_folders::{KnownFolder, get_known_folder_path};
    use std::path::PathBuf;

    /// `%ProgramData%\Sdfw`: shared, machine-wide application data, since this
    /// service mutates adapters belonging to the whole machine.
    pub fn config_dir() -> Option<PathBuf> {
        Some(get_known_folder_path(KnownFolder::ProgramData)?.join(APP_DIR_NAME))
    }

    pub fn log_dir() -> Option<PathBuf> {
        Some(
            get_known_folder_path(KnownFolder::ProgramData)?
                .join(APP_DIR_NAME)
                .join("logs"),
        )
    }

    /// Named pipes don't live on the filesystem, so this is only used for the
    /// rare local temp file (e.g. a lock file).
    pub fn ipc_runtime_dir() -> Option<PathBuf> {
        config_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_dirs_contain_the_app_name() {
        for dir in [config_dir(), log_dir(), ipc_runtime_dir()] {
            let dir = dir.expect("should have gotten Some(path)");
            assert!(
                dir.components()
                    .any(|c| c == std::path::Component::Normal(APP_DIR_NAME.as_ref()))
            );
        }
    }
}
