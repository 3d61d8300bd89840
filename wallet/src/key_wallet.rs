use crate::errors::WalletError;
use crate::rpc::BitcoindRpc;
use crate::wallet_file::WalletFile;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ecdsa, Address, Amount, CompressedPublicKey, PrivateKey, ScriptBuf, Transaction, Witness};
use libjoin::{ChainNetwork, FundingInputs, FundingWallet, FundingWalletError, Recipient, Utxo};
use log::*;

/// Change below this amount is left to the miners.
pub const DUST_LIMIT: Amount = Amount::from_sat(546);

const TX_OVERHEAD_VBYTES: u64 = 11;
const P2WPKH_INPUT_VBYTES: u64 = 68;
const OUTPUT_VBYTES: u64 = 43;

/// A single-key P2WPKH wallet. It knows the coins it was given (or found with [`KeyWallet::refresh`]) and signs the
/// inputs of a joint transaction that spend them.
pub struct KeyWallet {
    network: ChainNetwork,
    key: PrivateKey,
    public_key: CompressedPublicKey,
    address: Address,
    coins: Vec<Utxo>,
    fee_rate: u64,
    secp: Secp256k1<All>,
}

impl KeyWallet {
    /// `fee_rate` is in sats per virtual byte.
    pub fn new(network: ChainNetwork, key: PrivateKey, fee_rate: u64) -> Result<Self, WalletError> {
        let secp = Secp256k1::new();
        let public_key = CompressedPublicKey::from_private_key(&secp, &key)
            .map_err(|e| WalletError::KeyError(e.to_string()))?;
        let address = Address::p2wpkh(&public_key, network.to_bitcoin());
        Ok(Self { network, key, public_key, address, coins: Vec::new(), fee_rate, secp })
    }

    pub fn from_file(file: &WalletFile, fee_rate: u64) -> Result<Self, WalletError> {
        Self::new(file.network, file.private_key()?, fee_rate)
    }

    pub fn network(&self) -> ChainNetwork {
        self.network
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    pub fn coins(&self) -> &[Utxo] {
        &self.coins
    }

    pub fn balance(&self) -> Amount {
        self.coins.iter().map(|c| c.amount).sum()
    }

    /// Replaces the wallet's coins. Coins that are not locked to this wallet's address are ignored.
    pub fn with_coins(mut self, coins: Vec<Utxo>) -> Self {
        self.set_coins(coins);
        self
    }

    /// Asks the node for the coins locked to this wallet's address.
    pub async fn refresh(&mut self, rpc: &BitcoindRpc) -> Result<Amount, WalletError> {
        let coins = rpc.scan_utxos(&self.address).await?;
        self.set_coins(coins);
        info!("Wallet {} holds {} coins worth {}", self.address, self.coins.len(), self.balance());
        Ok(self.balance())
    }

    fn set_coins(&mut self, coins: Vec<Utxo>) {
        let script = self.script_pubkey();
        let (mine, foreign): (Vec<_>, Vec<_>) = coins.into_iter().partition(|c| c.script_pubkey == script);
        if !foreign.is_empty() {
            warn!("Ignoring {} coins that do not belong to {}", foreign.len(), self.address);
        }
        self.coins = mine;
    }

    /// The fee this wallet contributes for spending `inputs` coins into `outputs` outputs.
    pub fn fee_for(&self, inputs: usize, outputs: usize) -> Amount {
        let vbytes = TX_OVERHEAD_VBYTES + P2WPKH_INPUT_VBYTES * inputs as u64 + OUTPUT_VBYTES * outputs as u64;
        Amount::from_sat(vbytes.saturating_mul(self.fee_rate))
    }

    /// Largest coins first, until the payments and this wallet's share of the fee are covered.
    pub fn select_coins(&self, payments: &[Recipient]) -> Result<FundingInputs, WalletError> {
        let target = payments
            .iter()
            .try_fold(Amount::ZERO, |acc, p| acc.checked_add(p.amount))
            .ok_or_else(|| WalletError::InternalError("payment total overflows".into()))?;
        let mut coins = self.coins.clone();
        coins.sort_by(|a, b| b.amount.cmp(&a.amount));
        let mut selected = Vec::new();
        let mut total = Amount::ZERO;
        let mut need = target;
        for coin in coins {
            total = total
                .checked_add(coin.amount)
                .ok_or_else(|| WalletError::InternalError("balance overflows".into()))?;
            selected.push(coin);
            let fee = self.fee_for(selected.len(), payments.len() + 1);
            need = target.checked_add(fee).ok_or_else(|| WalletError::InternalError("fee overflows".into()))?;
            if total >= need {
                let change = total - need;
                let change = (change >= DUST_LIMIT).then(|| Recipient::new(self.address.to_string(), change));
                debug!("Selected {} coins worth {total} for payments of {target}", selected.len());
                return Ok(FundingInputs { utxos: selected, change });
            }
        }
        Err(WalletError::InsufficientFunds { need: need.to_sat(), have: total.to_sat() })
    }

    /// Signs every input of `tx` that spends one of this wallet's coins listed in `utxos`.
    pub fn sign_inputs(&self, tx: &Transaction, utxos: &[Utxo]) -> Result<Transaction, WalletError> {
        let script = self.script_pubkey();
        let mut witnesses = Vec::new();
        let mut cache = SighashCache::new(tx);
        for (index, input) in tx.input.iter().enumerate() {
            let Some(utxo) = utxos.iter().find(|u| u.outpoint == input.previous_output && u.script_pubkey == script)
            else {
                continue;
            };
            let sighash = cache
                .p2wpkh_signature_hash(index, &utxo.script_pubkey, utxo.amount, EcdsaSighashType::All)
                .map_err(|e| WalletError::SigningError(e.to_string()))?;
            let message = Message::from_digest(sighash.to_byte_array());
            let signature = self.secp.sign_ecdsa(&message, &self.key.inner);
            let signature = ecdsa::Signature { signature, sighash_type: EcdsaSighashType::All };
            witnesses.push((index, Witness::p2wpkh(&signature, &self.public_key.0)));
        }
        if witnesses.is_empty() {
            return Err(WalletError::SigningError("none of the transaction inputs belong to this wallet".into()));
        }
        let count = witnesses.len();
        let mut signed = tx.clone();
        for (index, witness) in witnesses {
            signed.input[index].witness = witness;
        }
        debug!("Signed {count} inputs of {}", tx.compute_txid());
        Ok(signed)
    }
}

impl FundingWallet for KeyWallet {
    async fn fund(&self, payments: &[Recipient]) -> Result<FundingInputs, FundingWalletError> {
        Ok(self.select_coins(payments)?)
    }

    async fn sign(&self, tx: &Transaction, utxos: &[Utxo]) -> Result<Transaction, FundingWalletError> {
        Ok(self.sign_inputs(tx, utxos)?)
    }
}
