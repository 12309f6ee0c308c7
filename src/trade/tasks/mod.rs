//! Task implementations.
//!
//! Each task reads what it needs from the pending message, validates and
//! resolves everything through the collaborators, and only then writes to the
//! trade. A task that returns an error has not modified the trade.

pub mod buyer;
pub mod seller;

use bitcoin::{Transaction, Txid};

use super::message::TradeMessage;
use super::task::{TaskContext, TaskError};

pub(crate) fn check_trade_id(ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
    let message = ctx.pending_message()?;
    ensure_trade_id(ctx.model.trade_id(), message.trade_id())
}

pub(crate) fn process_payout_tx_published_message(
    ctx: &mut TaskContext<'_>,
) -> Result<(), TaskError> {
    let trade_id = ctx.trade_id();
    let raw_payout_tx = match ctx.pending_message()? {
        TradeMessage::PayoutTxPublished(m) => {
            ensure_trade_id(&trade_id, &m.trade_id)?;
            m.payout_tx.clone()
        }
        other => {
            return Err(TaskError::UnexpectedMessage {
                trade_id,
                task: super::task::TradeTask::ProcessPayoutTxPublishedMessage,
                kind: other.kind(),
            });
        }
    };

    let artifacts = &ctx.model.artifacts;
    require_unset(&trade_id, &artifacts.payout_tx, "payout tx")?;
    let deposit_txid = artifacts
        .deposit_tx
        .as_ref()
        .map(Transaction::compute_txid)
        .ok_or_else(|| TaskError::MissingMaterial {
            trade_id: trade_id.clone(),
            field: "deposit tx",
        })?;

    let payout_tx = resolve_tx(ctx, &trade_id, &raw_payout_tx, "resolve payout tx")?;
    ensure_spends(&trade_id, &payout_tx, deposit_txid, "payout tx")?;
    let peer_address = require_temp_peer_address(ctx, &trade_id)?;

    tracing::info!(%trade_id, payout_txid = %payout_tx.compute_txid(), "payout tx published");
    ctx.model.artifacts.payout_tx = Some(payout_tx);
    ctx.model.counterparty_address = Some(peer_address);
    ctx.request_persistence();
    Ok(())
}

pub(crate) fn ensure_trade_id(expected: &str, actual: &str) -> Result<(), TaskError> {
    if expected != actual {
        return Err(TaskError::TradeIdMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn require_unset<T>(
    trade_id: &str,
    slot: &Option<T>,
    field: &'static str,
) -> Result<(), TaskError> {
    if slot.is_some() {
        return Err(TaskError::AlreadyApplied {
            trade_id: trade_id.to_string(),
            field,
        });
    }
    Ok(())
}

pub(crate) fn require<T>(
    trade_id: &str,
    value: Option<T>,
    field: &'static str,
) -> Result<T, TaskError> {
    value.ok_or_else(|| TaskError::MissingMaterial {
        trade_id: trade_id.to_string(),
        field,
    })
}

pub(crate) fn resolve_tx(
    ctx: &TaskContext<'_>,
    trade_id: &str,
    raw: &[u8],
    operation: &'static str,
) -> Result<Transaction, TaskError> {
    ctx.wallet
        .tx_from_serialized(raw)
        .map_err(|source| TaskError::Wallet {
            trade_id: trade_id.to_string(),
            operation,
            source,
        })
}

pub(crate) fn ensure_spends(
    trade_id: &str,
    tx: &Transaction,
    deposit_txid: Txid,
    field: &'static str,
) -> Result<(), TaskError> {
    if !tx
        .input
        .iter()
        .any(|input| input.previous_output.txid == deposit_txid)
    {
        return Err(TaskError::NotSpendingDeposit {
            trade_id: trade_id.to_string(),
            field,
            deposit_txid,
        });
    }
    Ok(())
}

pub(crate) fn require_temp_peer_address(
    ctx: &TaskContext<'_>,
    trade_id: &str,
) -> Result<super::message::NodeAddress, TaskError> {
    require(
        trade_id,
        ctx.model.temp_peer_address.clone(),
        "peer node address",
    )
}
