pub mod controller;
pub mod message;
pub mod model;
pub mod persistence;
pub mod runner;
pub mod store;
pub mod task;
pub mod tasks;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeRole {
    Buyer,
    Seller,
}

impl TradeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
        }
    }
}

impl fmt::Display for TradeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            other => anyhow::bail!("unknown trade role: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradePhase {
    /// Offer taken, deposit tx prepared locally.
    Init,
    PayoutSignaturesExchanged,
    DepositPublished,
    Completed,
    Failed,
    /// Failed after the deposit tx was published; escrowed funds need arbitration.
    Disputed,
}

impl TradePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Disputed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::PayoutSignaturesExchanged => "payout_signatures_exchanged",
            Self::DepositPublished => "deposit_published",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Disputed => "disputed",
        }
    }
}

impl fmt::Display for TradePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradePhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Self::Init),
            "payout_signatures_exchanged" => Ok(Self::PayoutSignaturesExchanged),
            "deposit_published" => Ok(Self::DepositPublished),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "disputed" => Ok(Self::Disputed),
            other => anyhow::bail!("unknown trade phase: {other}"),
        }
    }
}

/// Persisted form of a trade's process state.
///
/// Transactions are consensus-serialized hex, signatures plain hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub role: TradeRole,
    pub phase: TradePhase,
    pub counterparty_address: Option<String>,

    pub prepared_deposit_tx_hex: Option<String>,
    pub deposit_tx_hex: Option<String>,
    pub delayed_payout_tx_hex: Option<String>,
    pub peer_delayed_payout_tx_signature_hex: Option<String>,
    pub payout_tx_hex: Option<String>,

    pub processed_message_uids: Vec<String>,
    pub error_message: Option<String>,
}
