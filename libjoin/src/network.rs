use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Unsupported bitcoin network: {0}. Use one of bitcoin, testnet or regtest")]
pub struct UnsupportedNetworkError(pub String);

/// The bitcoin networks that a joint funding round can run on. Signet is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChainNetwork {
    Mainnet,
    Testnet,
    Regtest,
}

impl ChainNetwork {
    pub fn to_bitcoin(self) -> Network {
        match self {
            ChainNetwork::Mainnet => Network::Bitcoin,
            ChainNetwork::Testnet => Network::Testnet,
            ChainNetwork::Regtest => Network::Regtest,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChainNetwork::Mainnet => "bitcoin",
            ChainNetwork::Testnet => "testnet",
            ChainNetwork::Regtest => "regtest",
        }
    }
}

impl FromStr for ChainNetwork {
    type Err = UnsupportedNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bitcoin" | "mainnet" | "main" => Ok(ChainNetwork::Mainnet),
            "testnet" | "testnet3" | "test" => Ok(ChainNetwork::Testnet),
            "regtest" => Ok(ChainNetwork::Regtest),
            _ => Err(UnsupportedNetworkError(s.to_string())),
        }
    }
}

impl TryFrom<String> for ChainNetwork {
    type Error = UnsupportedNetworkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChainNetwork> for String {
    fn from(value: ChainNetwork) -> Self {
        value.as_str().to_string()
    }
}

impl From<ChainNetwork> for Network {
    fn from(value: ChainNetwork) -> Self {
        value.to_bitcoin()
    }
}

impl Display for ChainNetwork {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_supported_networks() {
        assert_eq!("bitcoin".parse::<ChainNetwork>().unwrap(), ChainNetwork::Mainnet);
        assert_eq!("Mainnet".parse::<ChainNetwork>().unwrap(), ChainNetwork::Mainnet);
        assert_eq!("testnet".parse::<ChainNetwork>().unwrap(), ChainNetwork::Testnet);
        assert_eq!(" regtest ".parse::<ChainNetwork>().unwrap(), ChainNetwork::Regtest);
        assert_eq!(ChainNetwork::Regtest.to_bitcoin(), Network::Regtest);
    }

    #[test]
    fn signet_and_unknown_networks_are_rejected() {
        let err = "signet".parse::<ChainNetwork>().unwrap_err();
        assert_eq!(err, UnsupportedNetworkError("signet".into()));
        assert!("liquid".parse::<ChainNetwork>().is_err());
        assert!("".parse::<ChainNetwork>().is_err());
    }

    #[test]
    fn serde_uses_network_names() {
        let json = serde_json::to_string(&ChainNetwork::Testnet).unwrap();
        assert_eq!(json, "\"testnet\"");
        let net: ChainNetwork = serde_json::from_str("\"regtest\"").unwrap();
        assert_eq!(net, ChainNetwork::Regtest);
        assert!(serde_json::from_str::<ChainNetwork>("\"signet\"").is_err());
    }
}
