//! A task is one atomic step of trade-protocol logic run against a
//! [`TradeProcessModel`].

use std::fmt;

use bitcoin::Txid;

use super::message::{MessageKind, TradeMessage};
use super::model::TradeProcessModel;
use super::persistence::TradePersistence;
use super::tasks;
use crate::wallet::{TradeWalletService, WalletError};

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("trade id mismatch: trade {expected} received message for {actual}")]
    TradeIdMismatch { expected: String, actual: String },

    #[error("no pending message for trade {trade_id}")]
    NoPendingMessage { trade_id: String },

    #[error("task {task} cannot process {kind} for trade {trade_id}")]
    UnexpectedMessage {
        trade_id: String,
        task: TradeTask,
        kind: MessageKind,
    },

    #[error("missing {field} for trade {trade_id}")]
    MissingMaterial {
        trade_id: String,
        field: &'static str,
    },

    #[error("{field} already applied to trade {trade_id}")]
    AlreadyApplied {
        trade_id: String,
        field: &'static str,
    },

    #[error("{field} for trade {trade_id} does not match: expected {expected}, got {actual}")]
    TransactionMismatch {
        trade_id: String,
        field: &'static str,
        expected: Txid,
        actual: Txid,
    },

    #[error("{field} for trade {trade_id} does not spend deposit tx {deposit_txid}")]
    NotSpendingDeposit {
        trade_id: String,
        field: &'static str,
        deposit_txid: Txid,
    },

    #[error("wallet failed to {operation} for trade {trade_id}")]
    Wallet {
        trade_id: String,
        operation: &'static str,
        #[source]
        source: WalletError,
    },

    #[error("task {task} intercepted for trade {trade_id}: {reason}")]
    Intercepted {
        trade_id: String,
        task: TradeTask,
        reason: String,
    },
}

impl TaskError {
    /// Only transient collaborator outages are worth a redelivery; every
    /// protocol or cryptographic mismatch is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Wallet { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeTask {
    CheckTradeId,
    BuyerProcessDelayedPayoutTxSignatureRequest,
    SellerProcessDelayedPayoutTxSignatureResponse,
    BuyerProcessDepositTxAndDelayedPayoutTxMessage,
    ProcessPayoutTxPublishedMessage,
}

impl TradeTask {
    pub fn name(self) -> &'static str {
        match self {
            Self::CheckTradeId => "check_trade_id",
            Self::BuyerProcessDelayedPayoutTxSignatureRequest => {
                "buyer_process_delayed_payout_tx_signature_request"
            }
            Self::SellerProcessDelayedPayoutTxSignatureResponse => {
                "seller_process_delayed_payout_tx_signature_response"
            }
            Self::BuyerProcessDepositTxAndDelayedPayoutTxMessage => {
                "buyer_process_deposit_tx_and_delayed_payout_tx_message"
            }
            Self::ProcessPayoutTxPublishedMessage => "process_payout_tx_published_message",
        }
    }

    pub fn run(self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        match self {
            Self::CheckTradeId => tasks::check_trade_id(ctx),
            Self::BuyerProcessDelayedPayoutTxSignatureRequest => {
                tasks::buyer::process_delayed_payout_tx_signature_request(ctx)
            }
            Self::SellerProcessDelayedPayoutTxSignatureResponse => {
                tasks::seller::process_delayed_payout_tx_signature_response(ctx)
            }
            Self::BuyerProcessDepositTxAndDelayedPayoutTxMessage => {
                tasks::buyer::process_deposit_tx_and_delayed_payout_tx_message(ctx)
            }
            Self::ProcessPayoutTxPublishedMessage => {
                tasks::process_payout_tx_published_message(ctx)
            }
        }
    }
}

impl fmt::Display for TradeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a task may touch: the trade it runs on plus the collaborators.
pub struct TaskContext<'a> {
    pub model: &'a mut TradeProcessModel,
    pub wallet: &'a dyn TradeWalletService,
    pub persistence: &'a dyn TradePersistence,
}

impl TaskContext<'_> {
    pub fn trade_id(&self) -> String {
        self.model.trade_id().to_string()
    }

    pub fn pending_message(&self) -> Result<&TradeMessage, TaskError> {
        self.model
            .pending_message
            .as_ref()
            .ok_or_else(|| TaskError::NoPendingMessage {
                trade_id: self.trade_id(),
            })
    }

    pub fn request_persistence(&self) {
        self.persistence.request_persistence(self.model.to_record());
    }
}

/// Hook invoked around every task. Used by tests to observe or short-circuit
/// individual steps; the production controller runs without one.
pub trait TaskInterceptor: Send + Sync {
    /// Returning an error aborts the task before its logic runs.
    fn before_task(&self, model: &TradeProcessModel, task: TradeTask) -> Result<(), TaskError>;

    fn after_task(
        &self,
        _model: &TradeProcessModel,
        _task: TradeTask,
        _result: &Result<(), TaskError>,
    ) {
    }
}
