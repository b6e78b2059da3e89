//! ABOUTME: The Runtime struct owning the registry and injected capabilities
//! ABOUTME: No global state; everything the engine touches is passed in here

use crate::budget::BudgetAccountant;
use crate::context::RunContext;
use crate::emitter::{EventEmitter, EventOverflow};
use crate::handle::RunHandle;
use crate::scheduler::drive_plan;
use floe_compiler::plan::Plan;
use floe_core::error::{ErrorKind, FloeError};
use floe_core::events::{EventSink, NullEventSink, RunEvent};
use floe_core::registry::ComponentRegistry;
use floe_core::result::RunResult;
use floe_core::traits::estimator::{CostEstimator, ZeroCostEstimator};
use floe_core::traits::sandbox::SandboxExecutor;
use floe_core::types::RunId;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// How a run reacts to an unrecoverable node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailPolicy {
    /// First failure terminates the run; running siblings are cancelled.
    #[default]
    Halt,
    /// Failed-node descendants are skipped, everything else proceeds.
    ContinuePossible,
    /// Every node is attempted regardless of upstream failures.
    Always,
}

/// Per-run execution options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on concurrently executing nodes across all levels.
    pub max_parallel: usize,
    /// Hard cap on summed cost estimates; `None` disables budgeting.
    pub budget_usd: Option<f64>,
    pub fail_policy: FailPolicy,
    /// How long a cancelled node may keep running before it is abandoned.
    pub cancel_grace_ms: u64,
    /// Soft limit on the `events()` queue before overflow handling kicks in.
    pub event_soft_limit: usize,
    pub event_overflow: EventOverflow,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_parallel: 8,
            budget_usd: None,
            fail_policy: FailPolicy::Halt,
            cancel_grace_ms: 2_000,
            event_soft_limit: 1_024,
            event_overflow: EventOverflow::DropLowest,
        }
    }
}

impl RunOptions {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_budget_usd(mut self, budget_usd: f64) -> Self {
        self.budget_usd = Some(budget_usd);
        self
    }

    pub fn with_fail_policy(mut self, fail_policy: FailPolicy) -> Self {
        self.fail_policy = fail_policy;
        self
    }

    pub fn with_cancel_grace_ms(mut self, cancel_grace_ms: u64) -> Self {
        self.cancel_grace_ms = cancel_grace_ms;
        self
    }
}

/// Everything a run shares across its tasks (nested workflow runs included).
pub(crate) struct EngineShared {
    pub registry: Arc<ComponentRegistry>,
    pub options: RunOptions,
    pub run_id: RunId,
    pub emitter: EventEmitter,
    pub estimator: Arc<dyn CostEstimator>,
    pub sandbox: Option<Arc<dyn SandboxExecutor>>,
    pub budget: BudgetAccountant,
    pub cancel: CancellationToken,
    pub cancel_reason: Arc<Mutex<Option<String>>>,
    pub first_error: Mutex<Option<(ErrorKind, String)>>,
    pub semaphore: Arc<Semaphore>,
}

impl EngineShared {
    pub fn record_error(&self, kind: ErrorKind, message: String) {
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some((kind, message));
        }
    }

    pub fn cancel_reason_text(&self) -> String {
        self.cancel_reason
            .lock()
            .clone()
            .unwrap_or_else(|| "run cancelled".to_string())
    }
}

/// The execution engine: owns the registry plus the injected collaborators
/// (event sink, cost estimator, sandbox executor) and starts runs.
///
/// # Examples
///
/// ```ignore
/// let runtime = Runtime::new(registry)
///     .with_event_sink(sink)
///     .with_estimator(estimator);
/// let handle = runtime.run(plan, inputs, RunOptions::default());
/// let result = handle.await_completion().await?;
/// ```
pub struct Runtime {
    registry: Arc<ComponentRegistry>,
    event_sink: Arc<dyn EventSink>,
    estimator: Arc<dyn CostEstimator>,
    sandbox: Option<Arc<dyn SandboxExecutor>>,
}

impl Runtime {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            registry,
            event_sink: Arc::new(NullEventSink),
            estimator: Arc::new(ZeroCostEstimator),
            sandbox: None,
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn CostEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn SandboxExecutor>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Start a run. Must be called within a tokio runtime; the driver task
    /// is spawned immediately and the returned handle observes it.
    pub fn run(
        &self,
        plan: Arc<Plan>,
        initial_inputs: Map<String, Value>,
        options: RunOptions,
    ) -> RunHandle {
        let run_id = RunId::new();
        let (emitter, events_rx) =
            EventEmitter::new(Arc::clone(&self.event_sink), options.event_soft_limit, options.event_overflow);
        let depth = emitter.depth_counter();
        let dropped = emitter.dropped_counter();
        let cancel = CancellationToken::new();
        let cancel_reason = Arc::new(Mutex::new(None));

        let shared = Arc::new(EngineShared {
            registry: Arc::clone(&self.registry),
            run_id,
            estimator: Arc::clone(&self.estimator),
            sandbox: self.sandbox.clone(),
            budget: BudgetAccountant::new(options.budget_usd),
            cancel: cancel.clone(),
            cancel_reason: Arc::clone(&cancel_reason),
            first_error: Mutex::new(None),
            semaphore: Arc::new(Semaphore::new(options.max_parallel.max(1))),
            emitter,
            options,
        });

        let ctx = RunContext::root(initial_inputs);
        let join = tokio::spawn(async move {
            info!(%run_id, blueprint = %plan.blueprint_id, "run started");
            shared.emitter.emit(RunEvent::run_started(run_id));

            let outcome = drive_plan(Arc::clone(&shared), Arc::clone(&plan), Arc::clone(&ctx)).await;
            let result = RunResult {
                success: outcome.success,
                context: ctx.snapshot_results(),
                terminated_reason: outcome.terminated,
                first_error: shared.first_error.lock().clone(),
            };

            shared.emitter.emit(RunEvent::run_finished(run_id, &result));
            info!(%run_id, success = result.success, "run finished");
            result
        });

        RunHandle::new(run_id, join, cancel, cancel_reason, events_rx, depth, dropped)
    }
}

/// Convenience: run a plan to completion and return the result.
pub async fn run_to_completion(
    runtime: &Runtime,
    plan: Arc<Plan>,
    initial_inputs: Map<String, Value>,
    options: RunOptions,
) -> Result<RunResult, FloeError> {
    runtime.run(plan, initial_inputs, options).await_completion().await
}
