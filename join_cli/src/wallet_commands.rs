use crate::settings::{ParticipantSettings, Settings};
use anyhow::anyhow;
use std::path::PathBuf;
use wallet::{KeyWallet, WalletFile};

pub fn create_wallet(path: Option<PathBuf>, settings: &Settings) -> Result<(), anyhow::Error> {
    let network = settings.participant.network()?;
    let path = path.unwrap_or_else(|| settings.participant.wallet_path());
    let file = WalletFile::generate(network);
    file.save(&path)?;
    let wallet = KeyWallet::from_file(&file, settings.participant.fee_rate)?;
    println!("New {network} wallet saved to {}", path.display());
    println!("Address: {}", wallet.address());
    Ok(())
}

pub fn print_address(settings: &Settings) -> Result<(), anyhow::Error> {
    let wallet = load_wallet(&settings.participant)?;
    println!("{}", wallet.address());
    Ok(())
}

pub async fn print_balance(settings: &Settings) -> Result<(), anyhow::Error> {
    let mut wallet = load_wallet(&settings.participant)?;
    let rpc = settings.participant.bitcoind()?.connect()?;
    let balance = wallet.refresh(&rpc).await?;
    let height = rpc.block_count().await?;
    println!("{}: {balance} in {} coins at block {height}", wallet.address(), wallet.coins().len());
    Ok(())
}

/// Loads the configured wallet and checks that it is on the configured network.
pub fn load_wallet(settings: &ParticipantSettings) -> Result<KeyWallet, anyhow::Error> {
    let network = settings.network()?;
    let path = settings.wallet_path();
    let file = WalletFile::load(&path)
        .map_err(|e| anyhow!("Could not load the wallet from {}. {e}. Use `multijoin wallet new`", path.display()))?;
    if file.network != network {
        return Err(anyhow!("The wallet in {} is a {} wallet, not {network}", path.display(), file.network));
    }
    Ok(KeyWallet::from_file(&file, settings.fee_rate)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use libjoin::ChainNetwork;

    fn settings_in(dir: &tempfile::TempDir, network: &str) -> Settings {
        let mut settings = Settings::default().with_network(Some(network.into()));
        settings.participant.wallet_file = Some(dir.path().join("wallet.yml"));
        settings
    }

    #[test]
    fn create_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir, "regtest");
        create_wallet(None, &settings).unwrap();
        let wallet = load_wallet(&settings.participant).unwrap();
        assert_eq!(wallet.network(), ChainNetwork::Regtest);
        assert!(wallet.address().to_string().starts_with("bcrt1q"));
        assert!(create_wallet(None, &settings).is_err());
    }

    #[test]
    fn wallet_network_must_match() {
        let dir = tempfile::tempdir().unwrap();
        create_wallet(None, &settings_in(&dir, "regtest")).unwrap();
        let err = load_wallet(&settings_in(&dir, "bitcoin").participant).err().unwrap();
        assert!(err.to_string().contains("regtest wallet"));
    }

    #[test]
    fn missing_wallet() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_wallet(&settings_in(&dir, "regtest").participant).is_err());
    }
}
