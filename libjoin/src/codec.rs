//! Transaction encoding used on the wire and in round state.
//!
//! Transactions travel as consensus-encoded bytes (hex strings in JSON). These functions are the only place where
//! those bytes are turned back into [`Transaction`]s.

use crate::error::CodecError;
use bitcoin::consensus::{deserialize, serialize};
use bitcoin::{Script, Transaction, TxOut};

pub fn encode_tx(tx: &Transaction) -> Vec<u8> {
    serialize(tx)
}

pub fn decode_tx(bytes: &[u8]) -> Result<Transaction, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Transaction("empty transaction".into()));
    }
    let tx = deserialize::<Transaction>(bytes)?;
    Ok(tx)
}

pub fn encode_tx_hex(tx: &Transaction) -> String {
    hex::encode(encode_tx(tx))
}

/// True if both transactions spend the same inputs (in the same order, with the same sequence numbers) to the same
/// outputs, under the same version and lock time. Signatures, i.e. script_sigs and witnesses, are ignored.
pub fn same_skeleton(a: &Transaction, b: &Transaction) -> bool {
    a.version == b.version
        && a.lock_time == b.lock_time
        && a.output == b.output
        && a.input.len() == b.input.len()
        && a.input.iter().zip(&b.input).all(|(x, y)| x.previous_output == y.previous_output && x.sequence == y.sequence)
}

/// Index and output of the first output locked to `script`.
pub fn find_output<'a>(tx: &'a Transaction, script: &Script) -> Option<(u32, &'a TxOut)> {
    tx.output.iter().enumerate().find(|(_, o)| o.script_pubkey.as_script() == script).map(|(i, o)| (i as u32, o))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::helpers::{test_address, test_outpoint};
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, ScriptBuf, Sequence, TxIn, Witness};

    fn tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: test_outpoint(1),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut { value: Amount::from_sat(1_000), script_pubkey: test_address(1).script_pubkey() },
                TxOut { value: Amount::from_sat(2_000), script_pubkey: test_address(2).script_pubkey() },
            ],
        }
    }

    #[test]
    fn encoding_is_reversible() {
        let tx = tx();
        let hex_str = encode_tx_hex(&tx);
        assert_eq!(hex_str, hex::encode(encode_tx(&tx)));
        assert_eq!(decode_tx(&encode_tx(&tx)).unwrap(), tx);
        assert_eq!(decode_tx(&encode_tx(&tx)).unwrap().compute_txid(), tx.compute_txid());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(decode_tx(&[]), Err(CodecError::Transaction(_))));
        assert!(matches!(decode_tx(&[1, 2, 3]), Err(CodecError::Transaction(_))));
        let mut bytes = encode_tx(&tx());
        bytes.push(0);
        assert!(decode_tx(&bytes).is_err());
    }

    #[test]
    fn skeleton_ignores_witnesses_only() {
        let a = tx();
        let mut b = a.clone();
        b.input[0].witness = Witness::from_slice(&[vec![1u8; 71], vec![2u8; 33]]);
        assert!(same_skeleton(&a, &b));

        let mut c = a.clone();
        c.output[1].value = Amount::from_sat(1_999);
        assert!(!same_skeleton(&a, &c));

        let mut d = a.clone();
        d.input[0].sequence = Sequence::ZERO;
        assert!(!same_skeleton(&a, &d));

        let mut e = a.clone();
        e.lock_time = LockTime::from_height(100).unwrap();
        assert!(!same_skeleton(&a, &e));
    }

    #[test]
    fn locate_outputs() {
        let tx = tx();
        let (vout, out) = find_output(&tx, &test_address(2).script_pubkey()).unwrap();
        assert_eq!(vout, 1);
        assert_eq!(out.value, Amount::from_sat(2_000));
        assert!(find_output(&tx, &test_address(3).script_pubkey()).is_none());
    }
}
