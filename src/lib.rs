// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use config::Config;
use file_manager::FileManager;

pub mod config;
pub mod file_manager;
pub mod launcher;
pub mod service;
pub mod uri;

pub const BUS_NAME: &str = "org.freedesktop.FileManager1";
pub const OBJECT_PATH: &str = "/org/freedesktop/FileManager1";
pub const INTERFACE: &str = "org.freedesktop.FileManager1";

pub fn home_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home,
        None => {
            let path = PathBuf::from("/");
            log::warn!("failed to locate home directory, falling back to {path:?}");
            path
        }
    }
}

/// Runs the `org.freedesktop.FileManager1` service until it is told to exit
pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let launch_config = match Config::load() {
        Ok(ok) => ok,
        Err(err) => {
            log::error!("failed to read config: {}", err);
            return Err(err.into());
        }
    };
    log::info!("cmd: {}", launch_config.cmd.display());

    let file_manager = FileManager::new(&launch_config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(&file_manager))
}

async fn serve(file_manager: &FileManager) -> Result<(), Box<dyn std::error::Error>> {
    let (conn, stream) = match service::connect().await {
        Ok(ok) => ok,
        Err(err) => {
            log::error!("failed to register {} on the session bus: {}", BUS_NAME, err);
            return Err(err.into());
        }
    };
    service::run(&conn, stream, file_manager).await?;
    log::info!("exiting...");
    Ok(())
}
