//! Trade protocol messages exchanged between the two peers of a trade.

use std::fmt;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

/// Network address of a peer node (`host:port` or onion address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    DelayedPayoutTxSignatureRequest,
    DelayedPayoutTxSignatureResponse,
    DepositTxAndDelayedPayoutTx,
    PayoutTxPublished,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DelayedPayoutTxSignatureRequest => "delayed_payout_tx_signature_request",
            Self::DelayedPayoutTxSignatureResponse => "delayed_payout_tx_signature_response",
            Self::DepositTxAndDelayedPayoutTx => "deposit_tx_and_delayed_payout_tx",
            Self::PayoutTxPublished => "payout_tx_published",
        };
        f.write_str(name)
    }
}

/// Seller asks the buyer to sign the delayed payout tx.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedPayoutTxSignatureRequest {
    pub trade_id: String,
    pub uid: String,
    #[serde(with = "hex_bytes")]
    pub delayed_payout_tx: Vec<u8>,
    #[serde(with = "hex_bytes_opt", default)]
    pub delayed_payout_tx_seller_signature: Option<Vec<u8>>,
}

/// Buyer's answer: its delayed payout tx signature plus its deposit tx witnesses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedPayoutTxSignatureResponse {
    pub trade_id: String,
    pub uid: String,
    #[serde(with = "hex_bytes_opt", default)]
    pub delayed_payout_tx_buyer_signature: Option<Vec<u8>>,
    #[serde(with = "hex_bytes")]
    pub deposit_tx: Vec<u8>,
}

/// Seller hands the fully signed deposit tx and the delayed payout tx to the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositTxAndDelayedPayoutTxMessage {
    pub trade_id: String,
    pub uid: String,
    #[serde(with = "hex_bytes")]
    pub deposit_tx: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub delayed_payout_tx: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutTxPublishedMessage {
    pub trade_id: String,
    pub uid: String,
    #[serde(with = "hex_bytes")]
    pub payout_tx: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradeMessage {
    DelayedPayoutTxSignatureRequest(DelayedPayoutTxSignatureRequest),
    DelayedPayoutTxSignatureResponse(DelayedPayoutTxSignatureResponse),
    DepositTxAndDelayedPayoutTx(DepositTxAndDelayedPayoutTxMessage),
    PayoutTxPublished(PayoutTxPublishedMessage),
}

impl TradeMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::DelayedPayoutTxSignatureRequest(_) => MessageKind::DelayedPayoutTxSignatureRequest,
            Self::DelayedPayoutTxSignatureResponse(_) => {
                MessageKind::DelayedPayoutTxSignatureResponse
            }
            Self::DepositTxAndDelayedPayoutTx(_) => MessageKind::DepositTxAndDelayedPayoutTx,
            Self::PayoutTxPublished(_) => MessageKind::PayoutTxPublished,
        }
    }

    pub fn trade_id(&self) -> &str {
        match self {
            Self::DelayedPayoutTxSignatureRequest(m) => &m.trade_id,
            Self::DelayedPayoutTxSignatureResponse(m) => &m.trade_id,
            Self::DepositTxAndDelayedPayoutTx(m) => &m.trade_id,
            Self::PayoutTxPublished(m) => &m.trade_id,
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            Self::DelayedPayoutTxSignatureRequest(m) => &m.uid,
            Self::DelayedPayoutTxSignatureResponse(m) => &m.uid,
            Self::DepositTxAndDelayedPayoutTx(m) => &m.uid,
            Self::PayoutTxPublished(m) => &m.uid,
        }
    }
}

/// A message as delivered by the network layer, together with the address the
/// sending peer is currently reachable at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEnvelope {
    pub peer_address: NodeAddress,
    pub message: TradeMessage,
}

impl NetworkEnvelope {
    pub fn new(peer_address: NodeAddress, message: TradeMessage) -> Self {
        Self {
            peer_address,
            message,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("encode network envelope")
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("decode network envelope")
    }
}

pub fn new_message_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

mod hex_bytes {
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| hex::decode(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
