use bitcoin::Transaction;

use super::{require, require_temp_peer_address, require_unset, resolve_tx};
use crate::trade::message::TradeMessage;
use crate::trade::task::{TaskContext, TaskError, TradeTask};

/// Applies the buyer's delayed payout tx signature and deposit tx witnesses.
///
/// The peer address is only taken over once the signature and the deposit tx
/// have been verified, so an address attached to bad data is never used.
pub(crate) fn process_delayed_payout_tx_signature_response(
    ctx: &mut TaskContext<'_>,
) -> Result<(), TaskError> {
    let trade_id = ctx.trade_id();
    let (buyer_signature, raw_deposit_tx) = match ctx.pending_message()? {
        TradeMessage::DelayedPayoutTxSignatureResponse(m) => {
            super::ensure_trade_id(&trade_id, &m.trade_id)?;
            (
                m.delayed_payout_tx_buyer_signature.clone(),
                m.deposit_tx.clone(),
            )
        }
        other => {
            return Err(TaskError::UnexpectedMessage {
                trade_id,
                task: TradeTask::SellerProcessDelayedPayoutTxSignatureResponse,
                kind: other.kind(),
            });
        }
    };

    let artifacts = &ctx.model.artifacts;
    require_unset(
        &trade_id,
        &artifacts.peer_delayed_payout_tx_signature,
        "peer delayed payout tx signature",
    )?;
    require_unset(&trade_id, &artifacts.deposit_tx, "deposit tx")?;

    let buyer_signature = require(
        &trade_id,
        buyer_signature,
        "buyer delayed payout tx signature",
    )?;
    let prepared_deposit_tx: &Transaction = require(
        &trade_id,
        artifacts.prepared_deposit_tx.as_ref(),
        "prepared deposit tx",
    )?;

    let buyer_deposit_tx = resolve_tx(ctx, &trade_id, &raw_deposit_tx, "resolve peer deposit tx")?;
    let deposit_tx = ctx
        .wallet
        .add_peer_witnesses_to_deposit_tx(prepared_deposit_tx, &buyer_deposit_tx)
        .map_err(|source| TaskError::Wallet {
            trade_id: trade_id.clone(),
            operation: "add buyer witnesses to deposit tx",
            source,
        })?;

    let peer_address = require_temp_peer_address(ctx, &trade_id)?;

    tracing::info!(
        %trade_id,
        deposit_txid = %deposit_tx.compute_txid(),
        peer_address = %peer_address,
        "applied buyer delayed payout tx signature"
    );
    ctx.model.artifacts.peer_delayed_payout_tx_signature = Some(buyer_signature);
    ctx.model.artifacts.deposit_tx = Some(deposit_tx);
    ctx.model.counterparty_address = Some(peer_address);
    ctx.request_persistence();
    Ok(())
}
