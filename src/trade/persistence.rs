//! Fire-and-forget persistence of trade state.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use super::TradeRecord;
use super::store::SqliteTradeStore;

/// Receives snapshots of trade state to make durable.
///
/// Callers never wait for the write and never see its outcome; writes are
/// idempotent upserts, so a record may be requested any number of times.
pub trait TradePersistence: Send + Sync {
    fn request_persistence(&self, record: TradeRecord);
}

enum PersistCommand {
    Upsert(TradeRecord),
    Flush(oneshot::Sender<()>),
}

/// Forwards records to a background writer that upserts them into SQLite in
/// request order.
#[derive(Clone)]
pub struct QueuedTradePersister {
    tx: mpsc::UnboundedSender<PersistCommand>,
}

impl QueuedTradePersister {
    /// Spawns the writer on the current tokio runtime.
    pub fn spawn(store: Arc<Mutex<SqliteTradeStore>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::writer(rx, store));
        Self { tx }
    }

    /// Resolves once every record requested before this call has been written
    /// (or has failed and been logged).
    pub async fn flush(&self) -> anyhow::Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(PersistCommand::Flush(done_tx))
            .map_err(|_| anyhow::anyhow!("persistence writer stopped"))?;
        done_rx
            .await
            .map_err(|_| anyhow::anyhow!("persistence writer dropped flush"))
    }

    async fn writer(
        mut rx: mpsc::UnboundedReceiver<PersistCommand>,
        store: Arc<Mutex<SqliteTradeStore>>,
    ) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                PersistCommand::Upsert(record) => {
                    let trade_id = record.trade_id.clone();
                    match tokio::task::spawn_blocking({
                        let store = store.clone();
                        move || {
                            store
                                .lock()
                                .expect("store mutex poisoned")
                                .upsert_trade(&record)
                        }
                    })
                    .await
                    {
                        Ok(Ok(())) => {
                            tracing::debug!(%trade_id, "persisted trade");
                        }
                        Ok(Err(err)) => {
                            tracing::warn!(%trade_id, error = %format!("{err:#}"), "persist trade failed");
                        }
                        Err(err) => {
                            tracing::warn!(%trade_id, error = %err, "persist trade join error");
                        }
                    }
                }
                PersistCommand::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("persistence writer exiting");
    }
}

impl TradePersistence for QueuedTradePersister {
    fn request_persistence(&self, record: TradeRecord) {
        let trade_id = record.trade_id.clone();
        if self.tx.send(PersistCommand::Upsert(record)).is_err() {
            tracing::warn!(%trade_id, "persistence writer stopped, trade not persisted");
        }
    }
}
