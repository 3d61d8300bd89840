use crate::funding::{Recipient, Utxo};
use bitcoin::{Address, Amount, Transaction, Witness};
use log::*;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Wallet error: {0}")]
pub struct FundingWalletError(pub String);

impl From<&str> for FundingWalletError {
    fn from(s: &str) -> Self {
        FundingWalletError(s.to_string())
    }
}

/// The inputs a wallet selected to pay for a set of payments, and the change it wants back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FundingInputs {
    pub utxos: Vec<Utxo>,
    pub change: Option<Recipient>,
}

/// The participant's wallet: it pays for channel outputs and signs its own inputs of the joint transaction.
pub trait FundingWallet {
    /// Selects inputs that cover `payments` plus fees.
    fn fund(&self, payments: &[Recipient]) -> impl Future<Output = Result<FundingInputs, FundingWalletError>> + Send;

    /// Signs the inputs of `tx` that spend any of `utxos`, leaving every other input untouched.
    fn sign(
        &self,
        tx: &Transaction,
        utxos: &[Utxo],
    ) -> impl Future<Output = Result<Transaction, FundingWalletError>> + Send;
}

/// A wallet holding a fixed set of coins that "signs" by attaching a placeholder witness. Good enough for a
/// coordinator, which only checks that inputs carry a witness.
#[derive(Clone, Debug)]
pub struct MockWallet {
    coins: Vec<Utxo>,
    change_address: Address,
    fee: Amount,
    sign_calls: Arc<AtomicUsize>,
}

impl MockWallet {
    pub fn new(coins: Vec<Utxo>, change_address: Address, fee: Amount) -> Self {
        Self { coins, change_address, fee, sign_calls: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

impl FundingWallet for MockWallet {
    async fn fund(&self, payments: &[Recipient]) -> Result<FundingInputs, FundingWalletError> {
        let target = payments
            .iter()
            .try_fold(self.fee, |acc, p| acc.checked_add(p.amount))
            .ok_or(FundingWalletError::from("payment total overflows"))?;
        let mut coins = self.coins.clone();
        coins.sort_by(|a, b| b.amount.cmp(&a.amount));
        let mut selected = Vec::new();
        let mut total = Amount::ZERO;
        for coin in coins {
            if total >= target {
                break;
            }
            total += coin.amount;
            selected.push(coin);
        }
        if total < target {
            return Err(FundingWalletError(format!(
                "insufficient funds: need {} sats, have {} sats",
                target.to_sat(),
                total.to_sat()
            )));
        }
        let change = (total > target)
            .then(|| Recipient::new(self.change_address.to_string(), total - target));
        debug!("MockWallet: selected {} coins worth {} sats", selected.len(), total.to_sat());
        Ok(FundingInputs { utxos: selected, change })
    }

    async fn sign(&self, tx: &Transaction, utxos: &[Utxo]) -> Result<Transaction, FundingWalletError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        let mut signed = tx.clone();
        let mut count = 0;
        for input in signed.input.iter_mut() {
            if utxos.iter().any(|u| u.outpoint == input.previous_output) {
                input.witness = Witness::from_slice(&[vec![0x30; 71], vec![0x02; 33]]);
                count += 1;
            }
        }
        if count == 0 {
            return Err(FundingWalletError::from("none of the transaction inputs belong to this wallet"));
        }
        info!("MockWallet: signed {count} inputs of {}", tx.compute_txid());
        Ok(signed)
    }
}
