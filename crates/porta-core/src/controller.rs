//! Periodic driver for an endpoint reconciler
//!
//! The controller owns one background task per run. Ticks are strictly
//! sequential: a tick that overruns the interval causes the following ticks
//! to be skipped rather than queued.
//!
//! Lifecycle: `Stopped -> Running -> Stopping -> Stopped`. Both
//! [`ReconciliationController::start`] and [`ReconciliationController::stop`]
//! are idempotent.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use porta_common::{Endpoint, ShutdownSignal};

use crate::error::StoreError;
use crate::metrics::{self, Timer};
use crate::reconciler::{EndpointReconciler, ReconcileOutcome};

/// Controller lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Stopped,
    Running,
    Stopping,
}

/// Timing of the reconciliation loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub interval: Duration,
    /// Upper bound on waiting for an in-flight tick, and separately on the
    /// self-removal performed by `stop`
    pub shutdown_grace_period: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            shutdown_grace_period: Duration::from_secs(5),
        }
    }
}

/// Result of the most recent tick
pub type TickResult = Result<ReconcileOutcome, StoreError>;

pub struct ReconciliationController {
    reconciler: Arc<dyn EndpointReconciler>,
    local: Arc<RwLock<Endpoint>>,
    config: ControllerConfig,
    state: Arc<Mutex<ControllerState>>,
    stop_signal: Mutex<Option<ShutdownSignal>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    last_outcome: Arc<Mutex<Option<TickResult>>>,
    ticks: Arc<AtomicU64>,
}

impl ReconciliationController {
    pub fn new(
        reconciler: Arc<dyn EndpointReconciler>,
        local: Endpoint,
        config: ControllerConfig,
    ) -> Self {
        Self {
            reconciler,
            local: Arc::new(RwLock::new(local)),
            config,
            state: Arc::new(Mutex::new(ControllerState::Stopped)),
            stop_signal: Mutex::new(None),
            handle: Mutex::new(None),
            last_outcome: Arc::new(Mutex::new(None)),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock()
    }

    pub fn last_outcome(&self) -> Option<TickResult> {
        self.last_outcome.lock().clone()
    }

    /// Number of completed ticks since creation
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn reconciler(&self) -> &Arc<dyn EndpointReconciler> {
        &self.reconciler
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.local.read().clone()
    }

    /// Replace the published ports or address; picked up by the next tick
    pub fn update_local_endpoint(&self, local: Endpoint) {
        *self.local.write() = local;
    }

    /// Start ticking until `cancel` fires or [`Self::stop`] is called.
    ///
    /// The first tick fires immediately. Returns `false` if the controller
    /// was not stopped. A controller stopped by [`Self::stop`] can be started
    /// again; its reconciler resumes and re-registers the local endpoint.
    pub fn start(&self, cancel: &ShutdownSignal) -> bool {
        let mut state = self.state.lock();
        if *state != ControllerState::Stopped {
            return false;
        }
        self.reconciler.resume_reconciling();

        info!(
            "Starting {} endpoint reconciler every {:?}",
            self.reconciler.reconciler_type(),
            self.config.interval
        );

        let stop = ShutdownSignal::new();
        let handle = tokio::spawn(Self::run(
            self.reconciler.clone(),
            self.local.clone(),
            self.config.interval,
            cancel.clone(),
            stop.clone(),
            self.state.clone(),
            self.last_outcome.clone(),
            self.ticks.clone(),
        ));

        *self.stop_signal.lock() = Some(stop);
        *self.handle.lock() = Some(handle);
        *state = ControllerState::Running;
        true
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        reconciler: Arc<dyn EndpointReconciler>,
        local: Arc<RwLock<Endpoint>>,
        period: Duration,
        cancel: ShutdownSignal,
        stop: ShutdownSignal,
        state: Arc<Mutex<ControllerState>>,
        last_outcome: Arc<Mutex<Option<TickResult>>>,
        ticks: Arc<AtomicU64>,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let kind = reconciler.reconciler_type();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Endpoint reconciler cancelled by caller");
                    break;
                }
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let endpoint = local.read().clone();
            let timer = Timer::new();
            let result = tokio::select! {
                result = reconciler.reconcile(&endpoint) => result,
                _ = cancel.cancelled() => {
                    info!("Endpoint reconciler cancelled by caller during a tick");
                    break;
                }
            };

            let outcome = match &result {
                Ok(outcome) => outcome.label(),
                Err(_) => "error",
            };
            metrics::record_tick(kind.as_str(), outcome, timer.elapsed_secs());
            log_tick(&endpoint, &result);

            *last_outcome.lock() = Some(result);
            ticks.fetch_add(1, Ordering::SeqCst);
        }

        let mut state = state.lock();
        if *state == ControllerState::Running {
            *state = ControllerState::Stopped;
        }
    }

    /// Stop ticking and remove the local endpoint from the published record.
    ///
    /// Waits up to the grace period for an in-flight tick before aborting it.
    /// Removal failures are logged and swallowed.
    pub async fn stop(&self) {
        let handle = {
            let mut state = self.state.lock();
            if *state == ControllerState::Stopping {
                return;
            }
            let Some(handle) = self.handle.lock().take() else {
                return;
            };
            *state = ControllerState::Stopping;
            handle
        };

        info!(
            "Stopping {} endpoint reconciler",
            self.reconciler.reconciler_type()
        );

        if let Some(stop) = self.stop_signal.lock().take() {
            stop.shutdown();
        }

        let grace = self.config.shutdown_grace_period;
        let mut handle = handle;
        if timeout(grace, &mut handle).await.is_err() {
            warn!(
                "Reconcile tick did not finish within {:?}, aborting it",
                grace
            );
            handle.abort();
        }

        self.reconciler.stop_reconciling();

        let local = self.local_endpoint();
        match timeout(grace, self.reconciler.remove_endpoints(&local)).await {
            Ok(Ok(())) => debug!("Removed {} from published endpoints", local.address()),
            Ok(Err(e)) => warn!(
                "Failed to remove {} from published endpoints: {}",
                local.address(),
                e
            ),
            Err(_) => warn!(
                "Removing {} from published endpoints timed out after {:?}",
                local.address(),
                grace
            ),
        }

        *self.state.lock() = ControllerState::Stopped;
        info!("Endpoint reconciler stopped");
    }
}

fn log_tick(local: &Endpoint, result: &TickResult) {
    match result {
        Ok(ReconcileOutcome::Published { members }) => {
            info!("Published {} endpoints from {}", members, local.address())
        }
        Ok(ReconcileOutcome::Deferred { attempts }) => warn!(
            "Endpoints update deferred to next tick after {} attempts",
            attempts
        ),
        Ok(outcome) => debug!("Reconcile tick: {}", outcome.label()),
        Err(e @ (StoreError::Unavailable(_) | StoreError::Timeout(_))) => {
            warn!("Reconcile tick failed, retrying next tick: {}", e)
        }
        Err(e) => error!("Reconcile tick failed: {}", e),
    }
}
