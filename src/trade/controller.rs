//! Routes inbound trade messages to per-trade workers and drives the phase
//! state machine.
//!
//! Each registered trade gets its own worker task that exclusively owns the
//! trade's [`TradeProcessModel`]. Messages for one trade queue up on the
//! worker's channel and are processed one at a time; different trades run
//! independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use super::message::{MessageKind, NetworkEnvelope};
use super::model::TradeProcessModel;
use super::persistence::TradePersistence;
use super::runner::{TaskFailure, TaskRunner, TaskSequence};
use super::task::{TaskInterceptor, TradeTask};
use super::{TradePhase, TradeRecord, TradeRole};
use crate::wallet::TradeWalletService;

pub struct ControllerConfig {
    pub wallet: Arc<dyn TradeWalletService>,
    pub persistence: Arc<dyn TradePersistence>,
    pub interceptor: Option<Arc<dyn TaskInterceptor>>,
}

impl ControllerConfig {
    pub fn new(
        wallet: Arc<dyn TradeWalletService>,
        persistence: Arc<dyn TradePersistence>,
    ) -> Self {
        Self {
            wallet,
            persistence,
            interceptor: None,
        }
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn TaskInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The task sequence completed and the trade advanced to `phase`.
    Applied { phase: TradePhase },
    /// A message with the same uid was already processed.
    Duplicate,
    /// The trade already reached a terminal phase.
    DiscardedTerminal { phase: TradePhase },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown trade {trade_id}")]
    UnknownTrade { trade_id: String },

    #[error("trade {trade_id} is already registered")]
    AlreadyRegistered { trade_id: String },

    #[error("{role} cannot process {kind} for trade {trade_id} in phase {phase}")]
    ProtocolViolation {
        trade_id: String,
        role: TradeRole,
        kind: MessageKind,
        phase: TradePhase,
    },

    #[error("trade {trade_id} failed to process {kind}, trade is {phase}")]
    TaskFailed {
        trade_id: String,
        kind: MessageKind,
        phase: TradePhase,
        retryable: bool,
        #[source]
        failure: TaskFailure,
    },

    #[error("worker for trade {trade_id} stopped")]
    WorkerStopped { trade_id: String },
}

impl DispatchError {
    /// Whether redelivering the same message may still succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TaskFailed {
                retryable: true,
                ..
            }
        )
    }
}

/// Task sequence for a message of `kind` arriving at a `role` trade in `phase`,
/// or `None` when the message is not acceptable there.
pub fn sequence_for(role: TradeRole, kind: MessageKind, phase: TradePhase) -> Option<TaskSequence> {
    use MessageKind as K;
    use TradePhase as P;
    use TradeRole as R;

    let (task, next_phase) = match (role, kind, phase) {
        (R::Buyer, K::DelayedPayoutTxSignatureRequest, P::Init) => (
            TradeTask::BuyerProcessDelayedPayoutTxSignatureRequest,
            P::PayoutSignaturesExchanged,
        ),
        (R::Seller, K::DelayedPayoutTxSignatureResponse, P::Init) => (
            TradeTask::SellerProcessDelayedPayoutTxSignatureResponse,
            P::PayoutSignaturesExchanged,
        ),
        (R::Buyer, K::DepositTxAndDelayedPayoutTx, P::PayoutSignaturesExchanged) => (
            TradeTask::BuyerProcessDepositTxAndDelayedPayoutTxMessage,
            P::DepositPublished,
        ),
        // The seller publishes the deposit tx itself right after the signature
        // exchange, so it never receives a message for that step.
        (R::Seller, K::PayoutTxPublished, P::PayoutSignaturesExchanged | P::DepositPublished)
        | (R::Buyer, K::PayoutTxPublished, P::DepositPublished) => {
            (TradeTask::ProcessPayoutTxPublishedMessage, P::Completed)
        }
        _ => return None,
    };

    Some(TaskSequence::new(
        vec![TradeTask::CheckTradeId, task],
        next_phase,
    ))
}

type DispatchResult = Result<DispatchOutcome, DispatchError>;

enum TradeCommand {
    Deliver {
        envelope: NetworkEnvelope,
        respond: oneshot::Sender<DispatchResult>,
    },
    Snapshot {
        respond: oneshot::Sender<TradeRecord>,
    },
}

/// Handle to a message handed off to a trade worker.
pub struct PendingDispatch {
    trade_id: String,
    rx: oneshot::Receiver<DispatchResult>,
}

impl PendingDispatch {
    pub async fn outcome(self) -> DispatchResult {
        self.rx.await.map_err(|_| DispatchError::WorkerStopped {
            trade_id: self.trade_id,
        })?
    }
}

#[derive(Default)]
struct Registry {
    active: HashMap<String, mpsc::UnboundedSender<TradeCommand>>,
    /// Last state of trades that reached a terminal phase. They have no worker.
    finished: HashMap<String, TradeRecord>,
}

#[derive(Clone)]
pub struct TradeProtocolController {
    config: Arc<ControllerConfig>,
    registry: Arc<Mutex<Registry>>,
}

impl TradeProtocolController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Takes ownership of `model` and starts its worker on the current tokio
    /// runtime. A model already in a terminal phase is only remembered so late
    /// messages for it can be discarded.
    pub fn register_trade(&self, model: TradeProcessModel) -> Result<(), DispatchError> {
        let trade_id = model.trade_id().to_string();
        let mut registry = self.registry.lock().expect("trades mutex poisoned");
        if registry.active.contains_key(&trade_id) || registry.finished.contains_key(&trade_id) {
            return Err(DispatchError::AlreadyRegistered { trade_id });
        }

        tracing::info!(%trade_id, role = %model.role, phase = %model.phase, "registered trade");
        let record = model.to_record();
        self.config.persistence.request_persistence(record.clone());

        if model.phase.is_terminal() {
            registry.finished.insert(trade_id, record);
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(
            model,
            rx,
            self.config.clone(),
            self.registry.clone(),
        ));
        registry.active.insert(trade_id, tx);
        Ok(())
    }

    /// Ids of all known trades, finished ones included.
    pub fn trade_ids(&self) -> Vec<String> {
        let registry = self.registry.lock().expect("trades mutex poisoned");
        let mut ids: Vec<String> = registry
            .active
            .keys()
            .chain(registry.finished.keys())
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Ids of trades that still have a worker.
    pub fn active_trade_ids(&self) -> Vec<String> {
        let registry = self.registry.lock().expect("trades mutex poisoned");
        let mut ids: Vec<String> = registry.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Hands `envelope` to the worker of the trade it belongs to without
    /// waiting for it to be processed.
    pub fn dispatch(&self, envelope: NetworkEnvelope) -> Result<PendingDispatch, DispatchError> {
        let trade_id = envelope.message.trade_id().to_string();
        let (respond, rx) = oneshot::channel();

        let registry = self.registry.lock().expect("trades mutex poisoned");
        if let Some(tx) = registry.active.get(&trade_id) {
            tx.send(TradeCommand::Deliver { envelope, respond })
                .map_err(|_| DispatchError::WorkerStopped {
                    trade_id: trade_id.clone(),
                })?;
        } else if let Some(record) = registry.finished.get(&trade_id) {
            tracing::info!(
                %trade_id,
                kind = %envelope.message.kind(),
                uid = %envelope.message.uid(),
                phase = %record.phase,
                "discarding message for finished trade"
            );
            let _ = respond.send(Ok(DispatchOutcome::DiscardedTerminal {
                phase: record.phase,
            }));
        } else {
            return Err(DispatchError::UnknownTrade { trade_id });
        }
        Ok(PendingDispatch { trade_id, rx })
    }

    pub async fn handle_message(&self, envelope: NetworkEnvelope) -> DispatchResult {
        self.dispatch(envelope)?.outcome().await
    }

    /// Current state of a trade, taken between two task sequences.
    pub async fn trade_record(&self, trade_id: &str) -> Result<TradeRecord, DispatchError> {
        let (respond, rx) = oneshot::channel();
        {
            let registry = self.registry.lock().expect("trades mutex poisoned");
            if let Some(tx) = registry.active.get(trade_id) {
                tx.send(TradeCommand::Snapshot { respond })
                    .map_err(|_| DispatchError::WorkerStopped {
                        trade_id: trade_id.to_string(),
                    })?;
            } else if let Some(record) = registry.finished.get(trade_id) {
                return Ok(record.clone());
            } else {
                return Err(DispatchError::UnknownTrade {
                    trade_id: trade_id.to_string(),
                });
            }
        }
        rx.await.map_err(|_| DispatchError::WorkerStopped {
            trade_id: trade_id.to_string(),
        })
    }
}

async fn run_worker(
    mut model: TradeProcessModel,
    mut rx: mpsc::UnboundedReceiver<TradeCommand>,
    config: Arc<ControllerConfig>,
    registry: Arc<Mutex<Registry>>,
) {
    let trade_id = model.trade_id().to_string();
    let mut retired = false;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            TradeCommand::Snapshot { respond } => {
                let _ = respond.send(model.to_record());
            }
            TradeCommand::Deliver { envelope, respond } => {
                let joined = tokio::task::spawn_blocking({
                    let config = config.clone();
                    move || {
                        let result = process_envelope(&mut model, envelope, &config);
                        (model, result)
                    }
                })
                .await;

                let (processed, result) = match joined {
                    Ok(joined) => joined,
                    Err(err) => {
                        tracing::error!(%trade_id, error = %err, "trade worker panicked");
                        registry
                            .lock()
                            .expect("trades mutex poisoned")
                            .active
                            .remove(&trade_id);
                        let _ = respond.send(Err(DispatchError::WorkerStopped {
                            trade_id: trade_id.clone(),
                        }));
                        return;
                    }
                };
                model = processed;

                // Commands already queued are still answered from the model;
                // later ones are answered from the finished record.
                if !retired && model.phase.is_terminal() {
                    let mut registry = registry.lock().expect("trades mutex poisoned");
                    registry.active.remove(&trade_id);
                    registry
                        .finished
                        .insert(trade_id.clone(), model.to_record());
                    retired = true;
                    tracing::debug!(%trade_id, phase = %model.phase, "trade worker retired");
                }
                let _ = respond.send(result);
            }
        }
    }
}

fn process_envelope(
    model: &mut TradeProcessModel,
    envelope: NetworkEnvelope,
    config: &ControllerConfig,
) -> DispatchResult {
    let NetworkEnvelope {
        peer_address,
        message,
    } = envelope;
    let trade_id = model.trade_id().to_string();
    let kind = message.kind();
    let uid = message.uid().to_string();

    if model.phase.is_terminal() {
        tracing::info!(%trade_id, %kind, %uid, phase = %model.phase, "discarding message for finished trade");
        return Ok(DispatchOutcome::DiscardedTerminal { phase: model.phase });
    }
    if model.processed_message_uids.contains(&uid) {
        tracing::info!(%trade_id, %kind, %uid, "discarding duplicate message");
        return Ok(DispatchOutcome::Duplicate);
    }

    let Some(sequence) = sequence_for(model.role, kind, model.phase) else {
        let err = DispatchError::ProtocolViolation {
            trade_id,
            role: model.role,
            kind,
            phase: model.phase,
        };
        model.processed_message_uids.insert(uid);
        fail_trade(model, err.to_string(), config);
        return Err(err);
    };

    tracing::info!(%trade_id, %kind, %uid, phase = %model.phase, "processing trade message");
    model.processed_message_uids.insert(uid.clone());
    model.temp_peer_address = Some(peer_address);
    model.pending_message = Some(message);

    let runner = TaskRunner::new(config.wallet.as_ref(), config.persistence.as_ref())
        .with_interceptor(config.interceptor.as_deref());
    let phase_before = model.phase;
    let result = runner.run(model, &sequence);

    model.pending_message = None;
    model.temp_peer_address = None;

    match result {
        Ok(()) => {
            tracing::info!(%trade_id, from = %phase_before, to = %model.phase, "trade phase advanced");
            Ok(DispatchOutcome::Applied { phase: model.phase })
        }
        Err(failure) if failure.error.is_retryable() => {
            model.processed_message_uids.remove(&uid);
            tracing::warn!(
                %trade_id,
                %kind,
                error = %failure.error,
                "retryable task failure, awaiting redelivery"
            );
            Err(DispatchError::TaskFailed {
                trade_id,
                kind,
                phase: model.phase,
                retryable: true,
                failure,
            })
        }
        Err(failure) => {
            fail_trade(model, format!("{}: {}", failure, failure.error), config);
            Err(DispatchError::TaskFailed {
                trade_id,
                kind,
                phase: model.phase,
                retryable: false,
                failure,
            })
        }
    }
}

/// Moves the trade to its terminal failure phase. Once a co-signed deposit tx
/// exists the funds may already be locked, so the trade goes to dispute.
fn fail_trade(model: &mut TradeProcessModel, reason: String, config: &ControllerConfig) {
    let phase = if model.artifacts.deposit_tx.is_some() {
        TradePhase::Disputed
    } else {
        TradePhase::Failed
    };
    tracing::warn!(trade_id = %model.trade_id(), from = %model.phase, to = %phase, %reason, "trade failed");
    model.phase = phase;
    model.error_message = Some(reason);
    config.persistence.request_persistence(model.to_record());
}
