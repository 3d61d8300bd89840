//! Output verification. A participant runs [`verify_outputs`] on every draft it is handed before signing it.

use crate::codec::decode_tx;
use crate::error::VerificationError;
use crate::funding::Recipient;
use crate::network::ChainNetwork;
use bitcoin::{Address, Amount, ScriptBuf, Transaction};
use std::str::FromStr;

/// Decodes `tx_bytes` and checks it with [`verify_transaction`]. Bytes that do not decode fail verification.
pub fn verify_outputs(
    tx_bytes: &[u8],
    expected: &[Recipient],
    network: ChainNetwork,
) -> Result<Transaction, VerificationError> {
    let tx = decode_tx(tx_bytes)?;
    verify_transaction(&tx, expected, network)?;
    Ok(tx)
}

/// Every expected `(address, amount)` pair must be paid by exactly one output of exactly that amount. A pair that
/// is listed `k` times must be matched by exactly `k` outputs.
pub fn verify_transaction(
    tx: &Transaction,
    expected: &[Recipient],
    network: ChainNetwork,
) -> Result<(), VerificationError> {
    let mut wanted: Vec<(&Recipient, ScriptBuf, usize)> = Vec::with_capacity(expected.len());
    for recipient in expected {
        if let Some(entry) = wanted.iter_mut().find(|(r, _, _)| *r == recipient) {
            entry.2 += 1;
            continue;
        }
        let script = script_for(&recipient.address, network)?;
        wanted.push((recipient, script, 1));
    }
    for (recipient, script, count) in wanted {
        check_recipient(tx, recipient, &script, count)?;
    }
    Ok(())
}

fn check_recipient(
    tx: &Transaction,
    recipient: &Recipient,
    script: &ScriptBuf,
    count: usize,
) -> Result<(), VerificationError> {
    let to_address: Vec<Amount> = tx.output.iter().filter(|o| &o.script_pubkey == script).map(|o| o.value).collect();
    let found = to_address.iter().filter(|v| **v == recipient.amount).count();
    if found == count {
        return Ok(());
    }
    if found > count {
        return Err(VerificationError::AmbiguousOutput {
            address: recipient.address.clone(),
            amount: recipient.amount.to_sat(),
            found,
            expected: count,
        });
    }
    match to_address.iter().find(|v| **v != recipient.amount) {
        Some(actual) if found == 0 => Err(VerificationError::WrongAmount {
            address: recipient.address.clone(),
            expected: recipient.amount.to_sat(),
            actual: actual.to_sat(),
        }),
        _ => Err(VerificationError::MissingOutput {
            address: recipient.address.clone(),
            amount: recipient.amount.to_sat(),
        }),
    }
}

fn script_for(address: &str, network: ChainNetwork) -> Result<ScriptBuf, VerificationError> {
    let address = Address::from_str(address)
        .ok()
        .and_then(|a| a.require_network(network.to_bitcoin()).ok())
        .ok_or_else(|| VerificationError::InvalidAddress(address.to_string()))?;
    Ok(address.script_pubkey())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::{DefaultTransactionBuilder, TransactionBuilder};
    use crate::codec::encode_tx;
    use crate::helpers::{test_address, test_recipient, test_utxo};

    fn draft(recipients: &[Recipient]) -> Transaction {
        DefaultTransactionBuilder::new(ChainNetwork::Regtest).build(recipients, &[test_utxo(50, 1_000_000)]).unwrap()
    }

    #[test]
    fn exact_match_passes() {
        let mine = vec![test_recipient(1, 50_000), test_recipient(2, 10_000)];
        let mut all = mine.clone();
        all.push(test_recipient(3, 70_000));
        let tx = draft(&all);
        let decoded = verify_outputs(&encode_tx(&tx), &mine, ChainNetwork::Regtest).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn substituted_output_fails() {
        let mine = vec![test_recipient(1, 50_000)];
        let mut tx = draft(&mine);
        tx.output[0].script_pubkey = test_address(99).script_pubkey();
        let err = verify_transaction(&tx, &mine, ChainNetwork::Regtest).unwrap_err();
        assert!(matches!(err, VerificationError::MissingOutput { amount: 50_000, .. }));
    }

    #[test]
    fn wrong_amount_fails() {
        let mine = vec![test_recipient(1, 50_000)];
        let mut tx = draft(&mine);
        tx.output[0].value = Amount::from_sat(49_999);
        let err = verify_transaction(&tx, &mine, ChainNetwork::Regtest).unwrap_err();
        assert_eq!(
            err,
            VerificationError::WrongAmount { address: mine[0].address.clone(), expected: 50_000, actual: 49_999 }
        );
    }

    #[test]
    fn duplicate_matches_are_ambiguous() {
        let mine = vec![test_recipient(1, 50_000)];
        let tx = draft(&[test_recipient(1, 50_000), test_recipient(1, 50_000)]);
        let err = verify_transaction(&tx, &mine, ChainNetwork::Regtest).unwrap_err();
        assert!(matches!(err, VerificationError::AmbiguousOutput { found: 2, expected: 1, .. }));
        // Asking for the same payment twice is satisfied by two outputs, but not by one.
        let twice = vec![test_recipient(1, 50_000), test_recipient(1, 50_000)];
        assert!(verify_transaction(&tx, &twice, ChainNetwork::Regtest).is_ok());
        let once = draft(&mine);
        assert!(matches!(
            verify_transaction(&once, &twice, ChainNetwork::Regtest),
            Err(VerificationError::MissingOutput { .. })
        ));
    }

    #[test]
    fn malformed_bytes_fail_closed() {
        let mine = vec![test_recipient(1, 50_000)];
        let err = verify_outputs(&[0xde, 0xad, 0xbe, 0xef], &mine, ChainNetwork::Regtest).unwrap_err();
        assert!(matches!(err, VerificationError::Malformed(_)));
        assert!(matches!(verify_outputs(&[], &mine, ChainNetwork::Regtest), Err(VerificationError::Malformed(_))));
    }

    #[test]
    fn undecodable_expected_address_fails() {
        let tx = draft(&[test_recipient(1, 50_000)]);
        let bad = vec![Recipient::new("bogus", Amount::from_sat(1))];
        assert!(matches!(
            verify_transaction(&tx, &bad, ChainNetwork::Regtest),
            Err(VerificationError::InvalidAddress(_))
        ));
        // A regtest address does not verify against a testnet expectation.
        let mine = vec![test_recipient(1, 50_000)];
        assert!(verify_transaction(&tx, &mine, ChainNetwork::Testnet).is_err());
    }
}
