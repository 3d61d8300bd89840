//! Deterministic addresses, coins and builders for tests. Enabled by the `test-fixtures` feature.

use crate::builder::{DefaultTransactionBuilder, TransactionBuilder};
use crate::error::BuildError;
use crate::funding::{Recipient, Utxo};
use crate::network::ChainNetwork;
use bitcoin::hashes::Hash;
use bitcoin::{Address, Amount, Network, OutPoint, ScriptBuf, Transaction, Txid};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A deterministic regtest P2WSH address. Different values of `n` give different addresses.
pub fn test_address(n: u8) -> Address {
    test_address_for(n, Network::Regtest)
}

pub fn test_address_for(n: u8, network: Network) -> Address {
    let script = ScriptBuf::from_bytes(vec![0x51, n]);
    Address::p2wsh(&script, network)
}

pub fn test_outpoint(n: u8) -> OutPoint {
    OutPoint { txid: Txid::from_byte_array([n; 32]), vout: u32::from(n) }
}

/// A UTXO of `sats` locked to `test_address(n)`.
pub fn test_utxo(n: u8, sats: u64) -> Utxo {
    Utxo::new(test_outpoint(n), Amount::from_sat(sats), test_address(n).script_pubkey())
}

pub fn test_recipient(n: u8, sats: u64) -> Recipient {
    Recipient::new(test_address(n).to_string(), Amount::from_sat(sats))
}

/// Wraps the default builder and counts how many times it was asked to build a transaction.
#[derive(Clone)]
pub struct CountingBuilder {
    inner: DefaultTransactionBuilder,
    calls: Arc<AtomicUsize>,
}

impl CountingBuilder {
    pub fn new(network: ChainNetwork) -> Self {
        Self { inner: DefaultTransactionBuilder::new(network), calls: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TransactionBuilder for CountingBuilder {
    fn build(&self, recipients: &[Recipient], utxos: &[Utxo]) -> Result<Transaction, BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.build(recipients, utxos)
    }
}

/// A malicious builder that redirects the first output of the transaction to `thief` after building it honestly.
#[derive(Clone)]
pub struct TamperingBuilder {
    inner: DefaultTransactionBuilder,
    thief: ScriptBuf,
}

impl TamperingBuilder {
    pub fn new(network: ChainNetwork, thief: &Address) -> Self {
        Self { inner: DefaultTransactionBuilder::new(network), thief: thief.script_pubkey() }
    }
}

impl TransactionBuilder for TamperingBuilder {
    fn build(&self, recipients: &[Recipient], utxos: &[Utxo]) -> Result<Transaction, BuildError> {
        let mut tx = self.inner.build(recipients, utxos)?;
        if let Some(out) = tx.output.first_mut() {
            out.script_pubkey = self.thief.clone();
        }
        Ok(tx)
    }
}
