use crate::errors::WalletError;
use bitcoin::{NetworkKind, PrivateKey};
use chrono::{DateTime, Utc};
use libjoin::ChainNetwork;
use log::*;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use zeroize::{Zeroize, Zeroizing};

/// The on-disk form of a [`crate::KeyWallet`]: its network and its private key in WIF.
#[derive(Clone, Serialize, Deserialize)]
pub struct WalletFile {
    pub network: ChainNetwork,
    secret: String,
    pub created: DateTime<Utc>,
}

impl Debug for WalletFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletFile")
            .field("network", &self.network)
            .field("secret", &"****")
            .field("created", &self.created)
            .finish()
    }
}

impl Drop for WalletFile {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl WalletFile {
    /// A wallet with a fresh random key.
    pub fn generate(network: ChainNetwork) -> Self {
        let key = PrivateKey::generate(network.to_bitcoin());
        Self { network, secret: key.to_wif(), created: Utc::now() }
    }

    pub fn from_key(network: ChainNetwork, key: &PrivateKey) -> Self {
        Self { network, secret: key.to_wif(), created: Utc::now() }
    }

    pub fn private_key(&self) -> Result<PrivateKey, WalletError> {
        let key = PrivateKey::from_wif(&self.secret).map_err(|e| WalletError::KeyError(e.to_string()))?;
        if key.network != NetworkKind::from(self.network.to_bitcoin()) {
            return Err(WalletError::KeyError(format!("the wallet key is not a {} key", self.network)));
        }
        Ok(key)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let path = path.as_ref();
        debug!("Loading wallet from {}", path.display());
        let contents = Zeroizing::new(fs::read_to_string(path)?);
        let wallet = serde_yml::from_str(&contents)?;
        Ok(wallet)
    }

    /// Writes the wallet to `path`, readable only by the owner on unix. Refuses to overwrite an existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), WalletError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = Zeroizing::new(serde_yml::to_string(self)?);
        let mut file = create_private(path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        info!("Wallet saved to {}", path.display());
        Ok(())
    }
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new().write(true).create_new(true).mode(0o600).open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<fs::File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}
