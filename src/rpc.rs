//! gRPC facade over the trade controller and the offer book.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use bitcoin::Transaction;
use tonic::{Code, Request, Response, Status};

use crate::offer::{EditOfferRequest, EditType, OfferEditError, OpenOffer, OpenOfferBook};
use crate::proto::v1 as pb;
use crate::trade::controller::{DispatchError, DispatchOutcome, TradeProtocolController};
use crate::trade::message::{NetworkEnvelope, NodeAddress};
use crate::trade::model::TradeProcessModel;
use crate::trade::{TradeRecord, TradeRole};

#[derive(Clone)]
pub struct DaemonService {
    controller: TradeProtocolController,
    offers: Arc<OpenOfferBook>,
}

impl DaemonService {
    pub fn new(controller: TradeProtocolController, offers: Arc<OpenOfferBook>) -> Self {
        Self { controller, offers }
    }

    fn record_to_proto(record: &TradeRecord) -> Result<pb::Trade> {
        Ok(pb::Trade {
            trade_id: record.trade_id.clone(),
            role: record.role.to_string(),
            phase: record.phase.to_string(),
            counterparty_address: record.counterparty_address.clone().unwrap_or_default(),
            deposit_txid: txid_of(record.deposit_tx_hex.as_deref()).context("deposit tx")?,
            has_peer_delayed_payout_tx_signature: record
                .peer_delayed_payout_tx_signature_hex
                .is_some(),
            payout_txid: txid_of(record.payout_tx_hex.as_deref()).context("payout tx")?,
            error_message: record.error_message.clone().unwrap_or_default(),
        })
    }

    fn offer_to_proto(offer: &OpenOffer) -> pb::OpenOffer {
        pb::OpenOffer {
            id: offer.id.clone(),
            use_market_based_price: offer.use_market_based_price,
            price: offer.fixed_price.to_string(),
            market_price_margin_pct: offer.market_price_margin,
            trigger_price: offer.trigger_price,
            is_activated: offer.is_activated(),
        }
    }

    fn model_from_proto(req: &pb::RegisterTradeRequest) -> Result<TradeProcessModel, Status> {
        if req.trade_id.is_empty() {
            return Err(Status::invalid_argument("trade_id is required"));
        }
        let role: TradeRole = req
            .role
            .parse()
            .map_err(|e: anyhow::Error| Status::invalid_argument(e.to_string()))?;
        let bytes = hex::decode(&req.prepared_deposit_tx_hex)
            .map_err(|e| Status::invalid_argument(format!("prepared_deposit_tx_hex: {e}")))?;
        let prepared: Transaction = bitcoin::consensus::deserialize(&bytes)
            .map_err(|e| Status::invalid_argument(format!("prepared_deposit_tx_hex: {e}")))?;

        let mut model =
            TradeProcessModel::new(req.trade_id.clone(), role).with_prepared_deposit_tx(prepared);
        if !req.counterparty_address.is_empty() {
            model = model.with_counterparty_address(NodeAddress::new(
                req.counterparty_address.clone(),
            ));
        }
        Ok(model)
    }

    fn edit_request_from_proto(req: &pb::EditOfferRequest) -> Result<EditOfferRequest, Status> {
        let edit_type = EditType::try_from(req.edit_type).map_err(edit_status)?;
        let enable = match req.enable {
            -1 => None,
            0 => Some(false),
            1 => Some(true),
            other => {
                return Err(Status::invalid_argument(format!(
                    "enable must be -1, 0 or 1, got {other}"
                )));
            }
        };
        Ok(EditOfferRequest {
            edit_type,
            edited_fixed_price_text: req.price.clone(),
            edited_use_market_based_price: req.use_market_based_price,
            edited_market_price_margin: req.market_price_margin_pct,
            edited_trigger_price: req.trigger_price,
            enable,
        })
    }
}

fn txid_of(tx_hex: Option<&str>) -> Result<String> {
    let Some(tx_hex) = tx_hex else {
        return Ok(String::new());
    };
    let bytes = hex::decode(tx_hex).context("decode tx hex")?;
    let tx: Transaction = bitcoin::consensus::deserialize(&bytes).context("deserialize tx")?;
    Ok(tx.compute_txid().to_string())
}

fn dispatch_status(err: DispatchError) -> Status {
    let code = match &err {
        DispatchError::UnknownTrade { .. } => Code::NotFound,
        DispatchError::AlreadyRegistered { .. } => Code::AlreadyExists,
        DispatchError::ProtocolViolation { .. } => Code::FailedPrecondition,
        DispatchError::TaskFailed {
            retryable: true, ..
        }
        | DispatchError::WorkerStopped { .. } => Code::Unavailable,
        DispatchError::TaskFailed { .. } => Code::Aborted,
    };
    Status::new(code, format!("{:#}", anyhow::Error::from(err)))
}

fn edit_status(err: OfferEditError) -> Status {
    match err {
        OfferEditError::OfferNotFound { .. } => Status::not_found(err.to_string()),
        OfferEditError::Persist { .. } => Status::internal(err.to_string()),
        _ => Status::invalid_argument(err.to_string()),
    }
}

#[tonic::async_trait]
impl pb::daemon_server::Daemon for DaemonService {
    async fn get_version(
        &self,
        _request: Request<pb::GetVersionRequest>,
    ) -> Result<Response<pb::GetVersionReply>, Status> {
        Ok(Response::new(pb::GetVersionReply {
            version: crate::VERSION.to_string(),
        }))
    }

    async fn get_trade(
        &self,
        request: Request<pb::GetTradeRequest>,
    ) -> Result<Response<pb::Trade>, Status> {
        let trade_id = request.into_inner().trade_id;
        if trade_id.is_empty() {
            return Err(Status::invalid_argument("trade_id is required"));
        }

        let record = self
            .controller
            .trade_record(&trade_id)
            .await
            .map_err(dispatch_status)?;
        let trade = Self::record_to_proto(&record)
            .map_err(|e| Status::internal(format!("encode trade: {e:#}")))?;
        Ok(Response::new(trade))
    }

    async fn register_trade(
        &self,
        request: Request<pb::RegisterTradeRequest>,
    ) -> Result<Response<pb::Trade>, Status> {
        let model = Self::model_from_proto(&request.into_inner())?;
        let record = model.to_record();
        self.controller
            .register_trade(model)
            .map_err(dispatch_status)?;
        let trade = Self::record_to_proto(&record)
            .map_err(|e| Status::internal(format!("encode trade: {e:#}")))?;
        Ok(Response::new(trade))
    }

    async fn edit_offer(
        &self,
        request: Request<pb::EditOfferRequest>,
    ) -> Result<Response<pb::OpenOffer>, Status> {
        let req = request.into_inner();
        if req.id.is_empty() {
            return Err(Status::invalid_argument("id is required"));
        }

        let edit = Self::edit_request_from_proto(&req)?;
        let offers = self.offers.clone();
        let offer_id = req.id.clone();
        let edited = tokio::task::spawn_blocking(move || offers.edit_offer(&offer_id, &edit))
            .await
            .map_err(|e| Status::internal(format!("join: {e}")))?
            .map_err(|e| {
                tracing::warn!(offer_id = %req.id, error = %e, "rejected offer edit");
                edit_status(e)
            })?;
        Ok(Response::new(Self::offer_to_proto(&edited)))
    }

    async fn deliver_message(
        &self,
        request: Request<pb::DeliverMessageRequest>,
    ) -> Result<Response<pb::DeliverMessageReply>, Status> {
        let req = request.into_inner();
        let envelope = NetworkEnvelope::from_json(&req.envelope_json)
            .map_err(|e| Status::invalid_argument(format!("invalid envelope: {e:#}")))?;
        let trade_id = envelope.message.trade_id().to_string();

        let outcome = self
            .controller
            .handle_message(envelope)
            .await
            .map_err(dispatch_status)?;
        let (outcome, phase) = match outcome {
            DispatchOutcome::Applied { phase } => (pb::DispatchOutcome::Applied, phase),
            DispatchOutcome::DiscardedTerminal { phase } => {
                (pb::DispatchOutcome::DiscardedTerminal, phase)
            }
            DispatchOutcome::Duplicate => {
                let record = self
                    .controller
                    .trade_record(&trade_id)
                    .await
                    .map_err(dispatch_status)?;
                (pb::DispatchOutcome::Duplicate, record.phase)
            }
        };
        Ok(Response::new(pb::DeliverMessageReply {
            outcome: outcome as i32,
            phase: phase.to_string(),
        }))
    }
}
