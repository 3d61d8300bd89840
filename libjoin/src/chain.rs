use bitcoin::{Transaction, Txid};
use log::*;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Broadcast error: {0}")]
pub struct BroadcastError(pub String);

impl From<&str> for BroadcastError {
    fn from(s: &str) -> Self {
        BroadcastError(s.to_string())
    }
}

/// Publishes a fully signed transaction to the bitcoin network.
pub trait BroadcastTransaction {
    fn broadcast(&self, tx: &Transaction) -> impl Future<Output = Result<Txid, BroadcastError>> + Send;
}

/// An in-memory broadcaster. It records every transaction it is handed and can be told to fail a number of times
/// before succeeding.
#[derive(Clone, Debug, Default)]
pub struct MockBroadcaster {
    calls: Arc<AtomicUsize>,
    failures_remaining: Arc<AtomicUsize>,
    published: Arc<Mutex<Vec<Txid>>>,
}

impl MockBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A broadcaster whose first `n` broadcasts fail.
    pub fn failing(n: usize) -> Self {
        let result = Self::default();
        result.failures_remaining.store(n, Ordering::SeqCst);
        result
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<Txid> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl BroadcastTransaction for MockBroadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BroadcastError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let txid = tx.compute_txid();
        let failed =
            self.failures_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if failed {
            warn!("MockBroadcaster: rejecting transaction {txid}");
            return Err(BroadcastError(format!("transaction {txid} rejected")));
        }
        info!("MockBroadcaster: broadcasting transaction {txid}");
        if let Ok(mut published) = self.published.lock() {
            published.push(txid);
        }
        Ok(txid)
    }
}
