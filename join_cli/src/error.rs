use libjoin::UnsupportedNetworkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid configuration file: {0}")]
    InvalidConfig(#[from] serde_yml::Error),
    #[error(transparent)]
    UnsupportedNetwork(#[from] UnsupportedNetworkError),
    #[error("Missing setting: {0}")]
    MissingSetting(String),
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}
