// SPDX-License-Identifier: GPL-3.0-only
// Implementation of https://www.freedesktop.org/wiki/Specifications/file-manager-interface/

use std::{fmt, process::ExitStatus};

use zbus::Message;

use crate::{
    config::LaunchConfig,
    launcher::{LaunchError, Launcher},
    service::RunState,
    uri::{self, DecodeError, UriList},
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Method {
    ShowFolders,
    ShowItems,
    ShowItemProperties,
    Exit,
    Unknown(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ShowFolders => "ShowFolders",
            Self::ShowItems => "ShowItems",
            Self::ShowItemProperties => "ShowItemProperties",
            Self::Exit => "Exit",
            Self::Unknown(name) => name,
        }
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        match name {
            "ShowFolders" => Self::ShowFolders,
            "ShowItems" => Self::ShowItems,
            "ShowItemProperties" => Self::ShowItemProperties,
            "Exit" => Self::Exit,
            _ => Self::Unknown(name.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to read URIs: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// What handling a call did. The caller gets an empty reply regardless.
#[derive(Debug)]
pub enum Dispatch {
    /// URIs were handed to the file manager, or that failed
    Forwarded(Result<ExitStatus, ForwardError>),
    /// `Exit` was called; `stopped` is false if the service was already stopping
    Exit { stopped: bool },
    /// Unrecognized method
    Ignored(String),
}

pub struct FileManager {
    launcher: Launcher,
    run_state: RunState,
}

impl FileManager {
    pub fn new(config: &LaunchConfig) -> Self {
        Self {
            launcher: Launcher::new(&config.cmd),
            run_state: RunState::default(),
        }
    }

    pub fn run_state(&self) -> &RunState {
        &self.run_state
    }

    /// Handles one method call on the `org.freedesktop.FileManager1` interface.
    ///
    /// Failures are logged and never turned into an error reply, the interface
    /// has no error return that existing callers would understand.
    pub fn dispatch(&self, msg: &Message) -> Dispatch {
        let header = msg.header();
        let method = header
            .member()
            .map_or_else(|| Method::Unknown(String::new()), |m| Method::from(m.as_str()));

        match method {
            Method::Exit => {
                let stopped = self.run_state.stop();
                log::info!("exit requested");
                Dispatch::Exit { stopped }
            }
            Method::Unknown(name) => {
                log::debug!("ignoring unknown method {:?}", name);
                Dispatch::Ignored(name)
            }
            method => {
                log::info!("{} {:?}", method, header.signature().map(|s| s.as_str()));
                self.forward(&method, uri::decode_message(msg))
            }
        }
    }

    /// Launches the file manager for already decoded URIs.
    pub fn forward(&self, method: &Method, decoded: Result<UriList, DecodeError>) -> Dispatch {
        let result = decoded
            .map_err(ForwardError::from)
            .and_then(|uris| {
                log::info!("{} {:?}", method, uris);
                self.launcher
                    .launch(method.as_str(), &uris)
                    .map_err(ForwardError::from)
            });
        if let Err(err) = &result {
            log::warn!("failed to handle {}: {}", method, err);
        }
        Dispatch::Forwarded(result)
    }
}
