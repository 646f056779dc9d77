//! The reconciliation loop: blends periodic and event-driven cycles with
//! debouncing, exponential backoff on consecutive failures, and a
//! readiness signal for the health server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::metrics;
use crate::plan::Plan;
use crate::provider::Provider;
use crate::source::Source;

/// Largest shift exponent used when computing backoff, to avoid overflow
/// on long outages.
const MAX_BACKOFF_SHIFT: u32 = 20;

/// Controller tuning parameters. Zero durations are normalised to the
/// defaults on construction.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Periodic reconciliation interval. Default: 60s.
    pub interval: Duration,
    /// Quiet period after a source event before reconciliation. Default: 5s.
    pub debounce: Duration,
    /// Base duration for exponential backoff on failures. Default: 5s.
    pub backoff_base: Duration,
    /// Backoff ceiling. Default: 5m.
    pub backoff_max: Duration,
    /// Log planned changes without applying them.
    pub dry_run: bool,
    /// Run exactly one reconciliation cycle then return.
    pub once: bool,
    /// Ownership identifier written to TXT records; empty uses the default.
    pub owner_id: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            debounce: Duration::from_secs(5),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            dry_run: false,
            once: false,
            owner_id: String::new(),
        }
    }
}

impl ControllerConfig {
    fn normalised(mut self) -> Self {
        let defaults = Self::default();
        if self.interval.is_zero() {
            self.interval = defaults.interval;
        }
        if self.debounce.is_zero() {
            self.debounce = defaults.debounce;
        }
        if self.backoff_base.is_zero() {
            self.backoff_base = defaults.backoff_base;
        }
        if self.backoff_max.is_zero() {
            self.backoff_max = defaults.backoff_max;
        }
        self
    }
}

/// Exponential backoff duration after `consecutive_errors` failed cycles
/// (1-based): `min(max, base * 2^(n-1))` with a capped shift.
fn backoff_duration(base: Duration, max: Duration, consecutive_errors: u32) -> Duration {
    let shift = consecutive_errors.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    let backoff = base.saturating_mul(1u32 << shift);
    backoff.min(max)
}

/// Orchestrates periodic and event-driven DNS reconciliation.
pub struct Controller {
    source: Arc<dyn Source>,
    provider: Arc<dyn Provider>,
    plan: Plan,
    cfg: ControllerConfig,
    ready: Arc<AtomicBool>,
}

impl Controller {
    /// Wire a controller with the given source, provider, and config.
    pub fn new(
        source: Arc<dyn Source>,
        provider: Arc<dyn Provider>,
        cfg: ControllerConfig,
    ) -> Self {
        let cfg = cfg.normalised();
        Self {
            source,
            provider,
            plan: Plan::new(&cfg.owner_id),
            cfg,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True after the most recent cycle succeeded. Gates the readiness
    /// endpoint.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Shared readiness flag for the health server.
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    /// Run the reconciliation loop until `shutdown` is cancelled. In once
    /// mode a single cycle runs synchronously and its result is returned;
    /// no event handler is registered and no timer is created.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), Error> {
        if self.cfg.once {
            return self.run_cycle().await;
        }

        // Single-slot channel: a pending signal already means "reconcile as
        // soon as possible", so further sends are dropped.
        let (reconcile_tx, mut reconcile_rx) = mpsc::channel::<()>(1);

        // The debounce timer is rearmed by the source's callback task and
        // fires on its own task; the slot is the only shared state.
        let debounce_timer: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));
        let debounce = self.cfg.debounce;
        self.source.add_event_handler(Arc::new(move || {
            let mut slot = debounce_timer.lock();
            if let Some(prev) = slot.take() {
                prev.abort();
            }
            let tx = reconcile_tx.clone();
            *slot = Some(tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                let _ = tx.try_send(());
            }));
        }));

        let mut consecutive_errors: u32 = 0;
        // The timer fires immediately for the first cycle, then resets to
        // the interval (success) or the backoff (failure).
        let mut next_delay = Duration::ZERO;

        loop {
            let timer = tokio::time::sleep(next_delay);
            tokio::pin!(timer);

            tokio::select! {
                _ = shutdown.cancelled() => return Err(Error::Cancelled),
                _ = &mut timer => {}
                Some(()) = reconcile_rx.recv() => {
                    debug!("event-triggered reconciliation");
                }
            }

            // Cancellation aborts the in-flight cycle's I/O.
            let result = tokio::select! {
                _ = shutdown.cancelled() => return Err(Error::Cancelled),
                result = self.run_cycle() => result,
            };

            match result {
                Ok(()) => {
                    consecutive_errors = 0;
                    next_delay = self.cfg.interval;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    next_delay = backoff_duration(
                        self.cfg.backoff_base,
                        self.cfg.backoff_max,
                        consecutive_errors,
                    );
                    error!(
                        error = %e,
                        consecutive_errors,
                        retry_in = ?next_delay,
                        "reconciliation failed"
                    );
                }
            }
        }
    }

    /// One cycle plus its bookkeeping: duration histogram, result counter,
    /// readiness flag.
    async fn run_cycle(&self) -> Result<(), Error> {
        let start = Instant::now();
        let result = self.reconcile().await;
        metrics::record_reconciliation(result.is_ok(), start.elapsed());
        self.ready.store(result.is_ok(), Ordering::SeqCst);
        result
    }

    /// One full fetch → diff → apply cycle.
    async fn reconcile(&self) -> Result<(), Error> {
        let desired = self
            .source
            .endpoints()
            .await
            .map_err(|e| Error::FetchDesired(Box::new(e)))?;

        let current = self
            .provider
            .records()
            .await
            .map_err(|e| Error::FetchCurrent(Box::new(e)))?;

        let changes = self.plan.calculate(&desired, &current);
        metrics::set_records_managed(desired.len());

        if changes.is_empty() {
            debug!("reconcile: no changes");
            return Ok(());
        }

        info!(
            create = changes.create.len(),
            update = changes.update_old.len(),
            delete = changes.delete.len(),
            "reconcile: planned changes"
        );

        if self.cfg.dry_run {
            info!("reconcile: dry-run enabled, skipping apply");
            log_changes(&changes);
            return Ok(());
        }

        match self.provider.apply(&changes).await {
            Ok(()) => {
                metrics::record_dns_operations(&changes, "success");
                info!("reconcile: changes applied");
                Ok(())
            }
            Err(e) => {
                metrics::record_dns_operations(&changes, "error");
                Err(Error::Apply(Box::new(e)))
            }
        }
    }
}

/// Log the planned changes at info level for dry-run inspection.
fn log_changes(changes: &crate::plan::Changes) {
    for ep in &changes.create {
        info!(name = %ep.dns_name, r#type = %ep.record_type, targets = ?ep.targets, "dry-run: would create");
    }
    for (old, new) in changes.update_old.iter().zip(&changes.update_new) {
        info!(
            name = %old.dns_name,
            r#type = %old.record_type,
            old_targets = ?old.targets,
            new_targets = ?new.targets,
            "dry-run: would update"
        );
    }
    for ep in &changes.delete {
        info!(name = %ep.dns_name, r#type = %ep.record_type, targets = ?ep.targets, "dry-run: would delete");
    }
}
