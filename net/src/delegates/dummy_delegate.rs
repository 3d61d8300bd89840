//----------------------------------------   Dummy Channel Host   ------------------------------------------------------

use crate::delegates::error::DelegateError;
use crate::delegates::traits::ChannelHost;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::{Address, ScriptBuf, Txid};
use libjoin::{ChainNetwork, ChannelRequest};
use log::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// One call made to a [`DummyChannelHost`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostCall {
    Start(String),
    Cancel(String),
    Complete { peer_id: String, txid: Txid, vout: u32 },
    Close(String),
}

/// A channel host that keeps no channels. Funding addresses are derived from the host's name and the peer id, so
/// every host hands out distinct addresses. All calls are journalled.
#[derive(Clone, Debug)]
pub struct DummyChannelHost {
    name: String,
    network: ChainNetwork,
    journal: Arc<Mutex<Vec<HostCall>>>,
    refuse: Arc<HashSet<String>>,
}

impl DummyChannelHost {
    pub fn new(name: impl Into<String>, network: ChainNetwork) -> Self {
        Self { name: name.into(), network, journal: Arc::new(Mutex::new(Vec::new())), refuse: Arc::new(HashSet::new()) }
    }

    /// A host that fails to start channel opens with any of the given peers.
    pub fn refusing<I: IntoIterator<Item = S>, S: Into<String>>(mut self, peers: I) -> Self {
        self.refuse = Arc::new(peers.into_iter().map(Into::into).collect());
        self
    }

    pub fn funding_address(&self, peer_id: &str) -> Address {
        let seed = sha256::Hash::hash(format!("{}/{peer_id}", self.name).as_bytes());
        let script = ScriptBuf::from_bytes(seed.to_byte_array().to_vec());
        Address::p2wsh(&script, self.network.to_bitcoin())
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    fn record(&self, call: HostCall) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(call);
        }
    }
}

impl ChannelHost for DummyChannelHost {
    async fn start_channel_open(&self, request: &ChannelRequest) -> Result<String, DelegateError> {
        info!("DummyChannelHost({}): starting channel open with {} for {}", self.name, request.peer_id, request.amount);
        self.record(HostCall::Start(request.peer_id.clone()));
        if self.refuse.contains(&request.peer_id) {
            return Err(DelegateError(format!("peer {} refused the channel", request.peer_id)));
        }
        Ok(self.funding_address(&request.peer_id).to_string())
    }

    async fn cancel_channel_open(&self, peer_id: &str) -> Result<(), DelegateError> {
        info!("DummyChannelHost({}): cancelling channel open with {peer_id}", self.name);
        self.record(HostCall::Cancel(peer_id.to_string()));
        Ok(())
    }

    async fn complete_channel_open(&self, peer_id: &str, txid: Txid, vout: u32) -> Result<(), DelegateError> {
        info!("DummyChannelHost({}): channel with {peer_id} is funded by {txid}:{vout}", self.name);
        self.record(HostCall::Complete { peer_id: peer_id.to_string(), txid, vout });
        Ok(())
    }

    async fn close_channel(&self, peer_id: &str) -> Result<(), DelegateError> {
        info!("DummyChannelHost({}): closing channel with {peer_id}", self.name);
        self.record(HostCall::Close(peer_id.to_string()));
        Ok(())
    }
}
