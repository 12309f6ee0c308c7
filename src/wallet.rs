//! Wallet collaborator consumed by the trade tasks.
//!
//! Tasks never sign anything themselves. They hand serialized transactions and
//! peer witness material to a [`TradeWalletService`], which either returns a
//! fully formed result or a typed error and never exposes a half-merged
//! transaction.

use bitcoin::consensus;
use bitcoin::{Transaction, Txid};

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("decode serialized transaction")]
    Decode(#[source] consensus::encode::Error),

    #[error("trailing bytes after serialized transaction: consumed={consumed} len={len}")]
    TrailingBytes { consumed: usize, len: usize },

    #[error("peer deposit tx {peer} does not match local deposit tx {local}")]
    DepositTxMismatch { local: Txid, peer: Txid },

    #[error("conflicting witness on deposit tx input {index}")]
    ConflictingWitness { index: usize },

    #[error("peer deposit tx {txid} carries no witnesses missing from the local deposit tx")]
    NoPeerWitnesses { txid: Txid },

    #[error("wallet unavailable: {reason}")]
    Unavailable { reason: String },
}

impl WalletError {
    /// Whether the same operation may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub trait TradeWalletService: Send + Sync {
    /// Resolves a consensus-serialized transaction blob received from a peer.
    fn tx_from_serialized(&self, raw: &[u8]) -> Result<Transaction, WalletError>;

    /// Returns a copy of `local_deposit_tx` with the peer's input witnesses
    /// from `peer_deposit_tx` added. `local_deposit_tx` is never modified.
    fn add_peer_witnesses_to_deposit_tx(
        &self,
        local_deposit_tx: &Transaction,
        peer_deposit_tx: &Transaction,
    ) -> Result<Transaction, WalletError>;
}

/// Keyless wallet service working purely on `bitcoin` transaction structures.
#[derive(Debug, Clone, Default)]
pub struct BitcoinTradeWallet;

impl BitcoinTradeWallet {
    pub fn new() -> Self {
        Self
    }
}

impl TradeWalletService for BitcoinTradeWallet {
    fn tx_from_serialized(&self, raw: &[u8]) -> Result<Transaction, WalletError> {
        let (tx, consumed) =
            consensus::deserialize_partial::<Transaction>(raw).map_err(WalletError::Decode)?;
        if consumed != raw.len() {
            return Err(WalletError::TrailingBytes {
                consumed,
                len: raw.len(),
            });
        }
        Ok(tx)
    }

    fn add_peer_witnesses_to_deposit_tx(
        &self,
        local_deposit_tx: &Transaction,
        peer_deposit_tx: &Transaction,
    ) -> Result<Transaction, WalletError> {
        let local = local_deposit_tx.compute_txid();
        let peer = peer_deposit_tx.compute_txid();
        if local != peer || local_deposit_tx.input.len() != peer_deposit_tx.input.len() {
            return Err(WalletError::DepositTxMismatch { local, peer });
        }

        let mut merged = local_deposit_tx.clone();
        let mut added = 0usize;
        for (index, (ours, theirs)) in merged
            .input
            .iter_mut()
            .zip(peer_deposit_tx.input.iter())
            .enumerate()
        {
            if theirs.witness.is_empty() {
                continue;
            }
            if ours.witness.is_empty() {
                ours.witness = theirs.witness.clone();
                added += 1;
            } else if ours.witness != theirs.witness {
                return Err(WalletError::ConflictingWitness { index });
            }
        }

        if added == 0 {
            return Err(WalletError::NoPeerWitnesses { txid: peer });
        }

        tracing::debug!(txid = %local, added, "added peer witnesses to deposit tx");
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash as _;
    use bitcoin::transaction::Version;
    use bitcoin::{
        Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness, absolute::LockTime,
    };

    use super::*;

    fn deposit_tx(witnesses: [Option<u8>; 2]) -> Transaction {
        let input = witnesses
            .iter()
            .enumerate()
            .map(|(i, w)| TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array([i as u8 + 1; 32]),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: match w {
                    Some(b) => Witness::from_slice(&[vec![*b; 71], vec![*b; 33]]),
                    None => Witness::new(),
                },
            })
            .collect();
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output: vec![TxOut {
                value: Amount::from_sat(200_000),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn merges_missing_peer_witnesses() {
        let wallet = BitcoinTradeWallet::new();
        let local = deposit_tx([Some(1), None]);
        let peer = deposit_tx([None, Some(2)]);

        let merged = wallet
            .add_peer_witnesses_to_deposit_tx(&local, &peer)
            .unwrap();
        assert_eq!(merged.input[0].witness, local.input[0].witness);
        assert_eq!(merged.input[1].witness, peer.input[1].witness);
        assert!(local.input[1].witness.is_empty());
    }

    #[test]
    fn rejects_conflicting_and_redundant_witnesses() {
        let wallet = BitcoinTradeWallet::new();
        let local = deposit_tx([Some(1), None]);

        let conflicting = deposit_tx([Some(9), Some(2)]);
        let err = wallet
            .add_peer_witnesses_to_deposit_tx(&local, &conflicting)
            .unwrap_err();
        assert!(matches!(err, WalletError::ConflictingWitness { index: 0 }));

        let merged = wallet
            .add_peer_witnesses_to_deposit_tx(&local, &deposit_tx([None, Some(2)]))
            .unwrap();
        let err = wallet
            .add_peer_witnesses_to_deposit_tx(&merged, &deposit_tx([None, Some(2)]))
            .unwrap_err();
        assert!(matches!(err, WalletError::NoPeerWitnesses { .. }));
    }

    #[test]
    fn rejects_other_transactions_and_garbage() {
        let wallet = BitcoinTradeWallet::new();
        let local = deposit_tx([Some(1), None]);
        let mut other = deposit_tx([None, Some(2)]);
        other.output[0].value = Amount::from_sat(1);
        let err = wallet
            .add_peer_witnesses_to_deposit_tx(&local, &other)
            .unwrap_err();
        assert!(matches!(err, WalletError::DepositTxMismatch { .. }));

        assert!(matches!(
            wallet.tx_from_serialized(&[0xde, 0xad]),
            Err(WalletError::Decode(_))
        ));

        let mut raw = consensus::serialize(&local);
        let tx = wallet.tx_from_serialized(&raw).unwrap();
        assert_eq!(tx, local);
        raw.push(0);
        assert!(matches!(
            wallet.tx_from_serialized(&raw),
            Err(WalletError::TrailingBytes { .. })
        ));
    }
}
