use crate::error::BuildError;
use crate::funding::{Recipient, Utxo};
use crate::network::ChainNetwork;
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use log::*;
use std::collections::HashSet;
use std::str::FromStr;

/// Builds the unsigned joint transaction of a round.
///
/// Implementations must be deterministic: the same recipients and inputs always produce the same transaction, since
/// every participant verifies and signs exactly the bytes the builder produced.
pub trait TransactionBuilder: Send + Sync {
    fn build(&self, recipients: &[Recipient], utxos: &[Utxo]) -> Result<Transaction, BuildError>;
}

/// Spends `utxos` in the order given to `recipients` in the order given. Version 2, no lock time, final sequence
/// numbers. Whatever the inputs hold above the total paid out is left as fee; the participants' wallets account for
/// it when they choose inputs and change.
#[derive(Clone, Debug)]
pub struct DefaultTransactionBuilder {
    network: ChainNetwork,
}

impl DefaultTransactionBuilder {
    pub fn new(network: ChainNetwork) -> Self {
        Self { network }
    }

    pub fn network(&self) -> ChainNetwork {
        self.network
    }

    fn script_for(&self, address: &str) -> Result<ScriptBuf, BuildError> {
        let invalid = |reason: String| BuildError::InvalidAddress { address: address.to_string(), reason };
        let address = Address::from_str(address)
            .map_err(|e| invalid(e.to_string()))?
            .require_network(self.network.to_bitcoin())
            .map_err(|e| invalid(e.to_string()))?;
        Ok(address.script_pubkey())
    }
}

impl TransactionBuilder for DefaultTransactionBuilder {
    fn build(&self, recipients: &[Recipient], utxos: &[Utxo]) -> Result<Transaction, BuildError> {
        if recipients.is_empty() {
            return Err(BuildError::NoRecipients);
        }
        if utxos.is_empty() {
            return Err(BuildError::NoInputs);
        }
        let mut seen = HashSet::with_capacity(utxos.len());
        let mut total_in = Amount::ZERO;
        for utxo in utxos {
            if !seen.insert(utxo.outpoint) {
                return Err(BuildError::DuplicateInput(utxo.outpoint.to_string()));
            }
            total_in = total_in.checked_add(utxo.amount).ok_or_else(|| BuildError::Overflow("inputs".into()))?;
        }
        let mut total_out = Amount::ZERO;
        let mut output = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            if recipient.amount == Amount::ZERO {
                return Err(BuildError::ZeroAmount(recipient.address.clone()));
            }
            let script_pubkey = self.script_for(&recipient.address)?;
            total_out =
                total_out.checked_add(recipient.amount).ok_or_else(|| BuildError::Overflow("outputs".into()))?;
            output.push(TxOut { value: recipient.amount, script_pubkey });
        }
        if total_in < total_out {
            return Err(BuildError::InsufficientFunds { inputs: total_in.to_sat(), outputs: total_out.to_sat() });
        }
        let input = utxos
            .iter()
            .map(|u| TxIn {
                previous_output: u.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect();
        let tx = Transaction { version: Version::TWO, lock_time: LockTime::ZERO, input, output };
        debug!(
            "Built joint transaction {} with {} inputs and {} outputs. Fee: {} sats",
            tx.compute_txid(),
            tx.input.len(),
            tx.output.len(),
            (total_in - total_out).to_sat()
        );
        Ok(tx)
    }
}
