//! Start-up errors for the server binary

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not determine the {0} directory")]
    NoProjectDir(&'static str),

    #[error("Failed to read config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Core(#[from] thesis_core::Error),

    #[error(transparent)]
    Net(#[from] thesis_net::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
