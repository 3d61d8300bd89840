use crate::error::CliError;
use libjoin::ChainNetwork;
use log::*;
use multijoin_net::{AgentConfig, CoordinatorConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wallet::BitcoindRpc;

/// The contents of the configuration file. Every field is optional; missing values take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub coordinator: CoordinatorSettings,
    pub participant: ParticipantSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub listen_address: String,
    pub network: String,
    pub quorum: usize,
    pub round_timeout_secs: u64,
    pub retention_secs: u64,
    pub reap_interval_secs: u64,
    pub broadcast_attempts: u32,
    pub broadcast_retry_secs: u64,
    pub bitcoind: Option<BitcoindSettings>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        let defaults = CoordinatorConfig::default();
        Self {
            listen_address: "127.0.0.1:7750".to_string(),
            network: defaults.network.to_string(),
            quorum: defaults.quorum,
            round_timeout_secs: defaults.round_timeout.as_secs(),
            retention_secs: defaults.retention.as_secs(),
            reap_interval_secs: defaults.reap_interval.as_secs(),
            broadcast_attempts: defaults.broadcast_attempts,
            broadcast_retry_secs: defaults.broadcast_retry.as_secs(),
            bitcoind: None,
        }
    }
}

impl CoordinatorSettings {
    /// Fails on an unsupported network name or a quorum below 2.
    pub fn to_config(&self) -> Result<CoordinatorConfig, CliError> {
        let network = self.network.parse::<ChainNetwork>()?;
        if self.quorum < 2 {
            return Err(CliError::InvalidSetting(format!("quorum must be at least 2, not {}", self.quorum)));
        }
        Ok(CoordinatorConfig {
            network,
            quorum: self.quorum,
            round_timeout: Duration::from_secs(self.round_timeout_secs),
            retention: Duration::from_secs(self.retention_secs),
            reap_interval: Duration::from_secs(self.reap_interval_secs.max(1)),
            broadcast_attempts: self.broadcast_attempts.max(1),
            broadcast_retry: Duration::from_secs(self.broadcast_retry_secs),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantSettings {
    pub coordinator_url: String,
    pub network: String,
    /// Name of this node, used to derive the simulated channel funding addresses.
    pub node_name: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub max_polls: u32,
    /// Sats per virtual byte.
    pub fee_rate: u64,
    pub wallet_file: Option<PathBuf>,
    pub bitcoind: Option<BitcoindSettings>,
}

impl Default for ParticipantSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            coordinator_url: "http://127.0.0.1:7750".to_string(),
            network: ChainNetwork::Testnet.to_string(),
            node_name: "multijoin".to_string(),
            poll_interval_secs: retry.poll_interval.as_secs(),
            request_timeout_secs: 10,
            max_retries: retry.max_retries,
            max_polls: retry.max_polls,
            fee_rate: 2,
            wallet_file: None,
            bitcoind: None,
        }
    }
}

impl ParticipantSettings {
    pub fn network(&self) -> Result<ChainNetwork, CliError> {
        Ok(self.network.parse()?)
    }

    pub fn agent_config(&self) -> Result<AgentConfig, CliError> {
        let retry = RetryPolicy {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            max_polls: self.max_polls,
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        };
        Ok(AgentConfig { network: self.network()?, retry })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.wallet_file.clone().unwrap_or_else(default_wallet_path)
    }

    pub fn bitcoind(&self) -> Result<&BitcoindSettings, CliError> {
        self.bitcoind.as_ref().ok_or_else(|| CliError::MissingSetting("participant.bitcoind".into()))
    }
}

/// Where to reach bitcoind's JSON-RPC interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoindSettings {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

fn default_rpc_timeout() -> u64 {
    30
}

impl BitcoindSettings {
    pub fn connect(&self) -> Result<BitcoindRpc, wallet::WalletError> {
        let rpc = BitcoindRpc::new(&self.url, Duration::from_secs(self.timeout_secs))?;
        Ok(match &self.user {
            Some(user) => rpc.with_auth(user, self.password.clone().unwrap_or_default()),
            None => rpc,
        })
    }
}

impl Settings {
    /// Loads the configuration file. An explicitly named file must exist; if the default file is missing, the
    /// defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };
        match std::fs::File::open(&path) {
            Ok(file) => {
                debug!("Loading configuration from {}", path.display());
                let reader = std::io::BufReader::new(file);
                Ok(serde_yml::from_reader(reader)?)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                info!("No configuration file at {}. Using defaults", path.display());
                Ok(Settings::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Applies the global `--network` flag to both roles.
    pub fn with_network(mut self, network: Option<String>) -> Self {
        if let Some(network) = network {
            self.coordinator.network = network.clone();
            self.participant.network = network;
        }
        self
    }
}

fn multijoin_dir() -> PathBuf {
    let mut home = std::env::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.push(".multijoin");
    home
}

pub fn default_config_path() -> PathBuf {
    multijoin_dir().join("config.yml")
}

pub fn default_wallet_path() -> PathBuf {
    multijoin_dir().join("wallet.yml")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_file_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "coordinator:\n  network: regtest\n  quorum: 5\n  bitcoind:\n    url: http://127.0.0.1:18443\n    user: rpc\n\
             participant:\n  fee_rate: 7\n",
        )
        .unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.coordinator.quorum, 5);
        assert_eq!(settings.coordinator.round_timeout_secs, 600);
        assert_eq!(settings.coordinator.listen_address, "127.0.0.1:7750");
        let bitcoind = settings.coordinator.bitcoind.as_ref().unwrap();
        assert_eq!(bitcoind.user.as_deref(), Some("rpc"));
        assert_eq!(bitcoind.timeout_secs, 30);
        assert_eq!(settings.participant.fee_rate, 7);
        assert_eq!(settings.participant.network, "testnet");

        let config = settings.coordinator.to_config().unwrap();
        assert_eq!(config.network, ChainNetwork::Regtest);
        assert_eq!(config.retention, Duration::from_secs(3600));
    }

    #[test]
    fn written_settings_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let settings = Settings::default().with_network(Some("regtest".into()));
        std::fs::write(&path, serde_yml::to_string(&settings).unwrap()).unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap(), settings);
    }

    #[test]
    fn participant_needs_bitcoind() {
        let mut settings = Settings::default();
        let err = settings.participant.bitcoind().unwrap_err();
        assert!(matches!(err, CliError::MissingSetting(ref s) if s == "participant.bitcoind"));
        settings.participant.bitcoind = Some(BitcoindSettings {
            url: "http://127.0.0.1:18443".into(),
            user: None,
            password: None,
            timeout_secs: 30,
        });
        assert_eq!(settings.participant.bitcoind().unwrap().url, "http://127.0.0.1:18443");
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yml");
        assert!(matches!(Settings::load(Some(&missing)), Err(CliError::IoError(_))));
    }

    #[test]
    fn unsupported_networks_are_rejected() {
        let settings = Settings::default().with_network(Some("signet".into()));
        assert!(matches!(settings.coordinator.to_config(), Err(CliError::UnsupportedNetwork(_))));
        assert!(matches!(settings.participant.agent_config(), Err(CliError::UnsupportedNetwork(_))));
        let settings = Settings::default().with_network(Some("bitcoin".into()));
        assert_eq!(settings.participant.network().unwrap(), ChainNetwork::Mainnet);
    }

    #[test]
    fn quorum_must_allow_a_joint_round() {
        let mut settings = Settings::default();
        settings.coordinator.quorum = 1;
        assert!(matches!(settings.coordinator.to_config(), Err(CliError::InvalidSetting(_))));
    }
}
