use libjoin::FundingWalletError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("RPC Error: {0}")]
    RpcError(String),
    #[error("Key Error: {0}")]
    KeyError(String),
    #[error("Not enough funds in wallet. Need {need} sats, have {have} sats")]
    InsufficientFunds { need: u64, have: u64 },
    #[error("Error deserializing: {0}")]
    DeserializeError(String),
    #[error("Error signing transaction: {0}")]
    SigningError(String),
    #[error("Wallet file error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("An internal error occurred: {0}")]
    InternalError(String),
}

impl From<reqwest::Error> for WalletError {
    fn from(e: reqwest::Error) -> Self {
        WalletError::RpcError(e.to_string())
    }
}

impl From<serde_yml::Error> for WalletError {
    fn from(e: serde_yml::Error) -> Self {
        WalletError::DeserializeError(e.to_string())
    }
}

impl From<WalletError> for FundingWalletError {
    fn from(e: WalletError) -> Self {
        FundingWalletError(e.to_string())
    }
}
