use crate::errors::WalletError;
use bitcoin::{Address, Amount, OutPoint, ScriptBuf, Transaction, Txid};
use libjoin::codec::encode_tx_hex;
use libjoin::{BroadcastError, BroadcastTransaction, Utxo};
use log::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::{Debug, Formatter};
use std::time::Duration;
use zeroize::Zeroizing;

/// A minimal bitcoind JSON-RPC client: enough to publish round transactions and find a wallet's coins.
#[derive(Clone)]
pub struct BitcoindRpc {
    http: reqwest::Client,
    url: String,
    auth: Option<(String, Zeroizing<String>)>,
}

impl Debug for BitcoindRpc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitcoindRpc")
            .field("url", &self.url)
            .field("user", &self.auth.as_ref().map(|(user, _)| user))
            .finish()
    }
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct ScanResult {
    success: bool,
    unspents: Vec<ScanUnspent>,
}

#[derive(Deserialize)]
struct ScanUnspent {
    txid: Txid,
    vout: u32,
    #[serde(rename = "scriptPubKey")]
    script_pubkey: String,
    amount: f64,
}

impl BitcoindRpc {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, WalletError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url: url.into(), auth: None })
    }

    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some((user.into(), Zeroizing::new(password.into())));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, WalletError> {
        trace!("bitcoind RPC call: {method}");
        let body = json!({ "jsonrpc": "1.0", "id": "multijoin", "method": method, "params": params });
        let mut request = self.http.post(&self.url).json(&body);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password.as_str()));
        }
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let reply: RpcResponse<T> = serde_json::from_slice(&bytes).map_err(|e| {
            WalletError::RpcError(format!("{method} returned HTTP {status} with an unreadable body. {e}"))
        })?;
        if let Some(err) = reply.error {
            return Err(WalletError::RpcError(format!("{method} failed with code {}: {}", err.code, err.message)));
        }
        reply.result.ok_or_else(|| WalletError::RpcError(format!("{method} returned no result")))
    }

    pub async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, WalletError> {
        let txid: Txid = self.call("sendrawtransaction", json!([encode_tx_hex(tx)])).await?;
        info!("Transaction {txid} published");
        Ok(txid)
    }

    pub async fn block_count(&self) -> Result<u64, WalletError> {
        self.call("getblockcount", json!([])).await
    }

    /// The unspent outputs locked to `address`, found with `scantxoutset`.
    pub async fn scan_utxos(&self, address: &Address) -> Result<Vec<Utxo>, WalletError> {
        let descriptor = format!("addr({address})");
        let result: ScanResult = self.call("scantxoutset", json!(["start", [descriptor]])).await?;
        if !result.success {
            return Err(WalletError::RpcError(format!("scantxoutset for {address} did not complete")));
        }
        result
            .unspents
            .into_iter()
            .map(|u| {
                let script_pubkey =
                    ScriptBuf::from_hex(&u.script_pubkey).map_err(|e| WalletError::DeserializeError(e.to_string()))?;
                let amount = Amount::from_btc(u.amount).map_err(|e| WalletError::DeserializeError(e.to_string()))?;
                Ok(Utxo::new(OutPoint { txid: u.txid, vout: u.vout }, amount, script_pubkey))
            })
            .collect()
    }
}

impl BroadcastTransaction for BitcoindRpc {
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BroadcastError> {
        self.send_raw_transaction(tx).await.map_err(|e| BroadcastError(e.to_string()))
    }
}
