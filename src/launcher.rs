// SPDX-License-Identifier: GPL-3.0-only

use std::{
    ffi::{CString, OsStr, OsString},
    io, iter,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
    process,
};

const FILE_SCHEME: &str = "file://";

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("{0:?} is not executable")]
    NotExecutable(PathBuf),
    #[error("failed to spawn {path:?}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for {path:?}: {source}")]
    Wait {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Removes one leading `file://`, other schemes are passed through as is.
//TODO: percent decode file URIs before handing them over
pub fn strip_file_scheme(uri: &str) -> &str {
    uri.strip_prefix(FILE_SCHEME).unwrap_or(uri)
}

/// Whether the current user may execute `path`, as checked by `access(2)`
pub fn is_executable(path: &Path) -> bool {
    let Ok(path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(path.as_ptr(), libc::X_OK) == 0 }
}

/// Runs the configured file manager as `<program> <method> <uri>...`.
#[derive(Clone, Debug)]
pub struct Launcher {
    program: PathBuf,
}

impl Launcher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn command(&self, method: &str, uris: &[String]) -> process::Command {
        let mut command = process::Command::new(&self.program);
        command
            .arg(method)
            .args(uris.iter().map(|uri| strip_file_scheme(uri)));
        command
    }

    /// Full argument vector of the process [`Launcher::launch`] would run.
    pub fn argv(&self, method: &str, uris: &[String]) -> Vec<OsString> {
        let command = self.command(method, uris);
        iter::once(command.get_program())
            .chain(command.get_args())
            .map(OsStr::to_os_string)
            .collect()
    }

    /// Runs the file manager and blocks until it exits.
    ///
    /// The exit status is logged and returned but means nothing to the caller,
    /// the file manager is on its own once it has been handed the URIs.
    pub fn launch(&self, method: &str, uris: &[String]) -> Result<process::ExitStatus, LaunchError> {
        log::info!("opening file manager with method {}", method);

        if !is_executable(&self.program) {
            log::warn!(
                "{} isn't executable, forgot to run `chmod +x {}`?",
                self.program.display(),
                self.program.display()
            );
            return Err(LaunchError::NotExecutable(self.program.clone()));
        }

        let mut child = self
            .command(method, uris)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                path: self.program.clone(),
                source,
            })?;
        log::info!("spawned {:?} with id {:?}", self.program, child.id());

        let status = child.wait().map_err(|source| LaunchError::Wait {
            path: self.program.clone(),
            source,
        })?;
        if status.success() {
            log::info!("{:?} exited with {status}", self.program);
        } else {
            log::warn!("{:?} exited with {status}", self.program);
        }
        Ok(status)
    }
}
