#![allow(dead_code)]

pub mod port;
pub mod wait;

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bitcoin::absolute::LockTime;
use bitcoin::consensus;
use bitcoin::hashes::Hash as _;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};

use trade_protocol::trade::TradeRecord;
use trade_protocol::trade::message::{
    DelayedPayoutTxSignatureRequest, DelayedPayoutTxSignatureResponse,
    DepositTxAndDelayedPayoutTxMessage, NetworkEnvelope, NodeAddress, PayoutTxPublishedMessage,
    TradeMessage, new_message_uid,
};
use trade_protocol::trade::persistence::TradePersistence;
use trade_protocol::wallet::{BitcoinTradeWallet, TradeWalletService, WalletError};

pub const BUYER_ADDRESS: &str = "buyer.onion:9999";
pub const SELLER_ADDRESS: &str = "seller.onion:9999";

fn witness(fill: u8) -> Witness {
    Witness::from_slice(&[vec![fill; 71], vec![fill; 33]])
}

fn input(txid: Txid, vout: u32, witness: Witness) -> TxIn {
    TxIn {
        previous_output: OutPoint { txid, vout },
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness,
    }
}

fn output(sats: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(sats),
        script_pubkey: ScriptBuf::new(),
    }
}

/// Two-input deposit tx: input 0 is funded by the seller, input 1 by the buyer.
/// Each side only carries the witnesses it has signed.
pub struct DepositTxs {
    pub seller_signed: Transaction,
    pub buyer_signed: Transaction,
    pub fully_signed: Transaction,
}

pub fn deposit_txs() -> DepositTxs {
    let build = |seller: Option<u8>, buyer: Option<u8>| Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![
            input(
                Txid::from_byte_array([0x11; 32]),
                0,
                seller.map(witness).unwrap_or_default(),
            ),
            input(
                Txid::from_byte_array([0x22; 32]),
                1,
                buyer.map(witness).unwrap_or_default(),
            ),
        ],
        output: vec![output(1_200_000)],
    };

    DepositTxs {
        seller_signed: build(Some(0xa1), None),
        buyer_signed: build(None, Some(0xb2)),
        fully_signed: build(Some(0xa1), Some(0xb2)),
    }
}

/// A tx spending output 0 of `deposit`.
pub fn spending_tx(deposit: &Transaction, lock_time: u32, sats: u64) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(lock_time),
        input: vec![input(deposit.compute_txid(), 0, Witness::new())],
        output: vec![output(sats)],
    }
}

pub fn delayed_payout_tx(deposit: &Transaction) -> Transaction {
    spending_tx(deposit, 850_000, 1_190_000)
}

pub fn payout_tx(deposit: &Transaction) -> Transaction {
    spending_tx(deposit, 0, 1_195_000)
}

pub fn envelope(peer: &str, message: TradeMessage) -> NetworkEnvelope {
    NetworkEnvelope::new(NodeAddress::new(peer), message)
}

pub fn signature_response(trade_id: &str, buyer_deposit_tx: &Transaction) -> TradeMessage {
    TradeMessage::DelayedPayoutTxSignatureResponse(DelayedPayoutTxSignatureResponse {
        trade_id: trade_id.to_string(),
        uid: new_message_uid(),
        delayed_payout_tx_buyer_signature: Some(vec![0x30; 71]),
        deposit_tx: consensus::serialize(buyer_deposit_tx),
    })
}

pub fn signature_request(trade_id: &str, delayed_payout_tx: &Transaction) -> TradeMessage {
    TradeMessage::DelayedPayoutTxSignatureRequest(DelayedPayoutTxSignatureRequest {
        trade_id: trade_id.to_string(),
        uid: new_message_uid(),
        delayed_payout_tx: consensus::serialize(delayed_payout_tx),
        delayed_payout_tx_seller_signature: Some(vec![0x31; 72]),
    })
}

pub fn deposit_message(
    trade_id: &str,
    deposit_tx: &Transaction,
    delayed_payout_tx: &Transaction,
) -> TradeMessage {
    TradeMessage::DepositTxAndDelayedPayoutTx(DepositTxAndDelayedPayoutTxMessage {
        trade_id: trade_id.to_string(),
        uid: new_message_uid(),
        deposit_tx: consensus::serialize(deposit_tx),
        delayed_payout_tx: consensus::serialize(delayed_payout_tx),
    })
}

pub fn payout_published(trade_id: &str, payout_tx: &Transaction) -> TradeMessage {
    TradeMessage::PayoutTxPublished(PayoutTxPublishedMessage {
        trade_id: trade_id.to_string(),
        uid: new_message_uid(),
        payout_tx: consensus::serialize(payout_tx),
    })
}

/// Keeps every requested record in memory.
#[derive(Default)]
pub struct RecordingPersistence {
    records: Mutex<Vec<TradeRecord>>,
}

impl RecordingPersistence {
    pub fn records(&self) -> Vec<TradeRecord> {
        self.records
            .lock()
            .expect("records mutex poisoned")
            .clone()
    }

    pub fn count(&self) -> usize {
        self.records.lock().expect("records mutex poisoned").len()
    }

    pub fn last(&self) -> Option<TradeRecord> {
        self.records
            .lock()
            .expect("records mutex poisoned")
            .last()
            .cloned()
    }
}

impl TradePersistence for RecordingPersistence {
    fn request_persistence(&self, record: TradeRecord) {
        self.records
            .lock()
            .expect("records mutex poisoned")
            .push(record);
    }
}

/// Wallet whose witness merge is unavailable for the first `outages` calls.
pub struct FlakyWallet {
    inner: BitcoinTradeWallet,
    outages: AtomicUsize,
}

impl FlakyWallet {
    pub fn new(outages: usize) -> Self {
        Self {
            inner: BitcoinTradeWallet::new(),
            outages: AtomicUsize::new(outages),
        }
    }
}

impl TradeWalletService for FlakyWallet {
    fn tx_from_serialized(&self, raw: &[u8]) -> Result<Transaction, WalletError> {
        self.inner.tx_from_serialized(raw)
    }

    fn add_peer_witnesses_to_deposit_tx(
        &self,
        local_deposit_tx: &Transaction,
        peer_deposit_tx: &Transaction,
    ) -> Result<Transaction, WalletError> {
        let down = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if down {
            return Err(WalletError::Unavailable {
                reason: "wallet is syncing".to_string(),
            });
        }
        self.inner
            .add_peer_witnesses_to_deposit_tx(local_deposit_tx, peer_deposit_tx)
    }
}
