pub mod errors;
pub mod key_wallet;
pub mod rpc;
pub mod wallet_file;

pub use errors::WalletError;
pub use key_wallet::KeyWallet;
pub use rpc::BitcoindRpc;
pub use wallet_file::WalletFile;
