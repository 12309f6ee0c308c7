use super::TradePhase;
use super::model::TradeProcessModel;
use super::persistence::TradePersistence;
use super::task::{TaskContext, TaskError, TaskInterceptor, TradeTask};
use crate::wallet::TradeWalletService;

/// Ordered tasks for one inbound message and the phase reached when all succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSequence {
    pub tasks: Vec<TradeTask>,
    pub next_phase: TradePhase,
}

impl TaskSequence {
    pub fn new(tasks: Vec<TradeTask>, next_phase: TradePhase) -> Self {
        Self { tasks, next_phase }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("task {task} failed")]
pub struct TaskFailure {
    pub task: TradeTask,
    #[source]
    pub error: TaskError,
}

/// Runs task sequences strictly in order against one trade.
pub struct TaskRunner<'a> {
    wallet: &'a dyn TradeWalletService,
    persistence: &'a dyn TradePersistence,
    interceptor: Option<&'a dyn TaskInterceptor>,
}

impl<'a> TaskRunner<'a> {
    pub fn new(wallet: &'a dyn TradeWalletService, persistence: &'a dyn TradePersistence) -> Self {
        Self {
            wallet,
            persistence,
            interceptor: None,
        }
    }

    pub fn with_interceptor(mut self, interceptor: Option<&'a dyn TaskInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    /// Executes `sequence`, halting at the first failing task.
    ///
    /// On failure no later task runs, and the artifacts and counterparty
    /// address are restored to their state before the sequence started. When
    /// an earlier task had changed them, the restored state is persisted
    /// again. On success the phase advances to `sequence.next_phase` and
    /// persistence is requested.
    pub fn run(
        &self,
        model: &mut TradeProcessModel,
        sequence: &TaskSequence,
    ) -> Result<(), TaskFailure> {
        let artifacts = model.artifacts.clone();
        let counterparty_address = model.counterparty_address.clone();

        for &task in &sequence.tasks {
            tracing::debug!(trade_id = %model.trade_id(), %task, "running task");

            let result = self.run_task(model, task);
            if let Some(interceptor) = self.interceptor {
                interceptor.after_task(model, task, &result);
            }

            if let Err(error) = result {
                let changed = model.artifacts != artifacts
                    || model.counterparty_address != counterparty_address;
                model.artifacts = artifacts;
                model.counterparty_address = counterparty_address;
                if changed {
                    self.persistence.request_persistence(model.to_record());
                }
                tracing::warn!(
                    trade_id = %model.trade_id(),
                    %task,
                    error = %error,
                    "task failed"
                );
                return Err(TaskFailure { task, error });
            }
        }

        model.phase = sequence.next_phase;
        self.persistence.request_persistence(model.to_record());
        Ok(())
    }

    fn run_task(&self, model: &mut TradeProcessModel, task: TradeTask) -> Result<(), TaskError> {
        if let Some(interceptor) = self.interceptor {
            interceptor.before_task(model, task)?;
        }

        let mut ctx = TaskContext {
            model,
            wallet: self.wallet,
            persistence: self.persistence,
        };
        task.run(&mut ctx)
    }
}
