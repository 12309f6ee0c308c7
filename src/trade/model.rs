use std::collections::BTreeSet;

use anyhow::{Context as _, Result};
use bitcoin::Transaction;
use bitcoin::consensus;

use super::message::{NodeAddress, TradeMessage};
use super::{TradePhase, TradeRecord, TradeRole};

/// Cryptographic material accumulated over the lifetime of a trade.
///
/// Every field goes from `None` to `Some` at most once; tasks refuse to
/// overwrite a field that is already present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeArtifacts {
    /// Deposit tx built locally when the offer was taken, carrying only our witnesses.
    pub prepared_deposit_tx: Option<Transaction>,
    /// Deposit tx carrying the witnesses of both peers.
    pub deposit_tx: Option<Transaction>,
    pub delayed_payout_tx: Option<Transaction>,
    pub peer_delayed_payout_tx_signature: Option<Vec<u8>>,
    pub payout_tx: Option<Transaction>,
}

/// Mutable per-trade state shared by all tasks of one trade.
#[derive(Debug, Clone)]
pub struct TradeProcessModel {
    trade_id: String,
    pub role: TradeRole,
    pub phase: TradePhase,
    pub counterparty_address: Option<NodeAddress>,
    /// Address the peer declared on the message currently being processed.
    pub temp_peer_address: Option<NodeAddress>,
    pub pending_message: Option<TradeMessage>,
    pub artifacts: TradeArtifacts,
    pub processed_message_uids: BTreeSet<String>,
    pub error_message: Option<String>,
}

impl TradeProcessModel {
    pub fn new(trade_id: impl Into<String>, role: TradeRole) -> Self {
        Self {
            trade_id: trade_id.into(),
            role,
            phase: TradePhase::Init,
            counterparty_address: None,
            temp_peer_address: None,
            pending_message: None,
            artifacts: TradeArtifacts::default(),
            processed_message_uids: BTreeSet::new(),
            error_message: None,
        }
    }

    pub fn with_counterparty_address(mut self, address: NodeAddress) -> Self {
        self.counterparty_address = Some(address);
        self
    }

    pub fn with_prepared_deposit_tx(mut self, tx: Transaction) -> Self {
        self.artifacts.prepared_deposit_tx = Some(tx);
        self
    }

    pub fn trade_id(&self) -> &str {
        &self.trade_id
    }

    pub fn to_record(&self) -> TradeRecord {
        TradeRecord {
            trade_id: self.trade_id.clone(),
            role: self.role,
            phase: self.phase,
            counterparty_address: self
                .counterparty_address
                .as_ref()
                .map(|a| a.as_str().to_string()),
            prepared_deposit_tx_hex: self
                .artifacts
                .prepared_deposit_tx
                .as_ref()
                .map(consensus::encode::serialize_hex),
            deposit_tx_hex: self
                .artifacts
                .deposit_tx
                .as_ref()
                .map(consensus::encode::serialize_hex),
            delayed_payout_tx_hex: self
                .artifacts
                .delayed_payout_tx
                .as_ref()
                .map(consensus::encode::serialize_hex),
            peer_delayed_payout_tx_signature_hex: self
                .artifacts
                .peer_delayed_payout_tx_signature
                .as_ref()
                .map(hex::encode),
            payout_tx_hex: self
                .artifacts
                .payout_tx
                .as_ref()
                .map(consensus::encode::serialize_hex),
            processed_message_uids: self.processed_message_uids.iter().cloned().collect(),
            error_message: self.error_message.clone(),
        }
    }

    /// Restores a trade from its persisted form. Transient fields (pending
    /// message, temporary peer address) start out empty.
    pub fn from_record(record: TradeRecord) -> Result<Self> {
        let artifacts = TradeArtifacts {
            prepared_deposit_tx: decode_tx(record.prepared_deposit_tx_hex.as_deref())
                .context("decode prepared_deposit_tx_hex")?,
            deposit_tx: decode_tx(record.deposit_tx_hex.as_deref())
                .context("decode deposit_tx_hex")?,
            delayed_payout_tx: decode_tx(record.delayed_payout_tx_hex.as_deref())
                .context("decode delayed_payout_tx_hex")?,
            peer_delayed_payout_tx_signature: record
                .peer_delayed_payout_tx_signature_hex
                .as_deref()
                .map(hex::decode)
                .transpose()
                .context("decode peer_delayed_payout_tx_signature_hex")?,
            payout_tx: decode_tx(record.payout_tx_hex.as_deref())
                .context("decode payout_tx_hex")?,
        };

        Ok(Self {
            trade_id: record.trade_id,
            role: record.role,
            phase: record.phase,
            counterparty_address: record.counterparty_address.map(NodeAddress::new),
            temp_peer_address: None,
            pending_message: None,
            artifacts,
            processed_message_uids: record.processed_message_uids.into_iter().collect(),
            error_message: record.error_message,
        })
    }
}

fn decode_tx(hex_str: Option<&str>) -> Result<Option<Transaction>> {
    let Some(hex_str) = hex_str else {
        return Ok(None);
    };
    let bytes = hex::decode(hex_str).context("decode hex")?;
    let tx = consensus::deserialize(&bytes).context("deserialize transaction")?;
    Ok(Some(tx))
}
