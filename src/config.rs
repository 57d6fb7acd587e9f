// SPDX-License-Identifier: GPL-3.0-only

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

/// Directory under the user config dir holding the `key=value` file.
pub const CONFIG_DIR_NAME: &str = "org.freedesktop.FileManager1.common";
pub const CONFIG_FILE_NAME: &str = "config";

/// Key naming the file manager executable.
pub const CMD_KEY: &str = "cmd";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to locate the user config directory")]
    NoConfigDir,
    #[error("failed to open config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config file {path:?} has no `{key}` entry")]
    MissingKey { path: PathBuf, key: &'static str },
}

/// Settings needed to launch the file manager, resolved once at startup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchConfig {
    pub cmd: PathBuf,
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Parsed `key=value` config file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Config {
    entries: Vec<(String, String)>,
}

impl Config {
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let trimmed = line.trim_start();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return None;
                }
                let (key, value) = line.split_once('=')?;
                Some((key.trim().to_string(), value.trim_end_matches('\r').to_string()))
            })
            .collect();
        Self { entries }
    }

    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Raw value of the first entry named `key`
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Value of `key` with home directory and environment expansion applied.
    ///
    /// The value is split into shell words and only the first one is kept, so
    /// `cmd=~/bin/my-files --flag` resolves to `$HOME/bin/my-files`.
    pub fn lookup_path(&self, key: &str) -> Option<PathBuf> {
        self.lookup(key).map(expand_path)
    }

    /// Reads the well-known config file and resolves the launch command.
    pub fn load() -> Result<LaunchConfig, ConfigError> {
        let path = config_path().ok_or(ConfigError::NoConfigDir)?;
        Self::open(&path)?.launch_config(&path)
    }

    fn launch_config(&self, path: &Path) -> Result<LaunchConfig, ConfigError> {
        match self.lookup_path(CMD_KEY) {
            Some(cmd) => Ok(LaunchConfig { cmd }),
            None => Err(ConfigError::MissingKey {
                path: path.to_path_buf(),
                key: CMD_KEY,
            }),
        }
    }
}

pub fn expand_path(value: &str) -> PathBuf {
    let word = match shlex::split(value).and_then(|words| words.into_iter().next()) {
        Some(word) => word,
        None => {
            log::warn!("failed to expand {:?}, using it verbatim", value);
            return PathBuf::from(value);
        }
    };

    let word = expand_vars(&word);
    if word == "~" {
        crate::home_dir()
    } else if let Some(rest) = word.strip_prefix("~/") {
        crate::home_dir().join(rest)
    } else {
        PathBuf::from(word)
    }
}

// Replaces `$NAME` and `${NAME}`, unset variables expand to nothing
fn expand_vars(word: &str) -> String {
    let mut expanded = String::with_capacity(word.len());
    let mut rest = word;
    while let Some(start) = rest.find('$') {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let (name, tail) = if let Some(braced) = after.strip_prefix('{') {
            braced.split_once('}').unwrap_or(("", after))
        } else if after.starts_with(|c: char| c.is_ascii_digit()) {
            ("", after)
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            after.split_at(end)
        };

        if name.is_empty() {
            expanded.push('$');
            rest = after;
        } else {
            expanded.push_str(&env::var(name).unwrap_or_default());
            rest = tail;
        }
    }
    expanded.push_str(rest);
    expanded
}
