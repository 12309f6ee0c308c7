use bitcoin::Transaction;

use super::{ensure_spends, require, require_temp_peer_address, require_unset, resolve_tx};
use crate::trade::message::TradeMessage;
use crate::trade::task::{TaskContext, TaskError, TradeTask};

pub(crate) fn process_delayed_payout_tx_signature_request(
    ctx: &mut TaskContext<'_>,
) -> Result<(), TaskError> {
    let trade_id = ctx.trade_id();
    let (raw_delayed_payout_tx, seller_signature) = match ctx.pending_message()? {
        TradeMessage::DelayedPayoutTxSignatureRequest(m) => {
            super::ensure_trade_id(&trade_id, &m.trade_id)?;
            (
                m.delayed_payout_tx.clone(),
                m.delayed_payout_tx_seller_signature.clone(),
            )
        }
        other => {
            return Err(TaskError::UnexpectedMessage {
                trade_id,
                task: TradeTask::BuyerProcessDelayedPayoutTxSignatureRequest,
                kind: other.kind(),
            });
        }
    };

    let artifacts = &ctx.model.artifacts;
    require_unset(&trade_id, &artifacts.delayed_payout_tx, "delayed payout tx")?;
    require_unset(
        &trade_id,
        &artifacts.peer_delayed_payout_tx_signature,
        "peer delayed payout tx signature",
    )?;

    let seller_signature = require(
        &trade_id,
        seller_signature,
        "seller delayed payout tx signature",
    )?;
    let deposit_txid = require(
        &trade_id,
        artifacts
            .prepared_deposit_tx
            .as_ref()
            .map(Transaction::compute_txid),
        "prepared deposit tx",
    )?;

    let delayed_payout_tx = resolve_tx(
        ctx,
        &trade_id,
        &raw_delayed_payout_tx,
        "resolve delayed payout tx",
    )?;
    ensure_spends(&trade_id, &delayed_payout_tx, deposit_txid, "delayed payout tx")?;
    let peer_address = require_temp_peer_address(ctx, &trade_id)?;

    ctx.model.artifacts.delayed_payout_tx = Some(delayed_payout_tx);
    ctx.model.artifacts.peer_delayed_payout_tx_signature = Some(seller_signature);
    ctx.model.counterparty_address = Some(peer_address);
    ctx.request_persistence();
    Ok(())
}

pub(crate) fn process_deposit_tx_and_delayed_payout_tx_message(
    ctx: &mut TaskContext<'_>,
) -> Result<(), TaskError> {
    let trade_id = ctx.trade_id();
    let (raw_deposit_tx, raw_delayed_payout_tx) = match ctx.pending_message()? {
        TradeMessage::DepositTxAndDelayedPayoutTx(m) => {
            super::ensure_trade_id(&trade_id, &m.trade_id)?;
            (m.deposit_tx.clone(), m.delayed_payout_tx.clone())
        }
        other => {
            return Err(TaskError::UnexpectedMessage {
                trade_id,
                task: TradeTask::BuyerProcessDepositTxAndDelayedPayoutTxMessage,
                kind: other.kind(),
            });
        }
    };

    let artifacts = &ctx.model.artifacts;
    require_unset(&trade_id, &artifacts.deposit_tx, "deposit tx")?;
    let expected_deposit_txid = require(
        &trade_id,
        artifacts
            .prepared_deposit_tx
            .as_ref()
            .map(Transaction::compute_txid),
        "prepared deposit tx",
    )?;
    let expected_delayed_payout_txid = require(
        &trade_id,
        artifacts
            .delayed_payout_tx
            .as_ref()
            .map(Transaction::compute_txid),
        "delayed payout tx",
    )?;

    let deposit_tx = resolve_tx(ctx, &trade_id, &raw_deposit_tx, "resolve deposit tx")?;
    let deposit_txid = deposit_tx.compute_txid();
    if deposit_txid != expected_deposit_txid {
        return Err(TaskError::TransactionMismatch {
            trade_id,
            field: "deposit tx",
            expected: expected_deposit_txid,
            actual: deposit_txid,
        });
    }

    let delayed_payout_tx = resolve_tx(
        ctx,
        &trade_id,
        &raw_delayed_payout_tx,
        "resolve delayed payout tx",
    )?;
    let delayed_payout_txid = delayed_payout_tx.compute_txid();
    if delayed_payout_txid != expected_delayed_payout_txid {
        return Err(TaskError::TransactionMismatch {
            trade_id,
            field: "delayed payout tx",
            expected: expected_delayed_payout_txid,
            actual: delayed_payout_txid,
        });
    }

    let peer_address = require_temp_peer_address(ctx, &trade_id)?;

    tracing::info!(%trade_id, %deposit_txid, "received co-signed deposit tx");
    ctx.model.artifacts.deposit_tx = Some(deposit_tx);
    ctx.model.counterparty_address = Some(peer_address);
    ctx.request_persistence();
    Ok(())
}
