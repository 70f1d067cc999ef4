// crates/ticket-flow-scheduler/src/scheduler.rs
// ============================================================================
// Module: Ticket Scheduler
// Description: Bounded worker pool and reconciliation loop.
// Purpose: Advance tickets off the async threads and retry stuck flows.
// Dependencies: ticket-flow-core, ticket-flow-config, tokio, tracing
// ============================================================================

//! ## Overview
//! Every manager call is short: it submits to the engine or reads state and
//! returns. Calls still block on the store and the engine client, so they run
//! through [`tokio::task::spawn_blocking`] under a semaphore sized by
//! `scheduler.worker_pool_size`.
//!
//! The reconciler sweeps open tickets on a fixed interval. Exclusion
//! conflicts are retried on every sweep; other failures follow the flow's
//! retry policy inside the manager. When more tickets are open than one sweep
//! may visit, each sweep resumes after the last ticket the previous one
//! visited, so tickets that stay open forever cannot starve newer ones.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use thiserror::Error;
use ticket_flow_config::SchedulerConfig;
use ticket_flow_core::Clock;
use ticket_flow_core::DagEngine;
use ticket_flow_core::ManagerError;
use ticket_flow_core::OperateRecordStore;
use ticket_flow_core::TicketFilter;
use ticket_flow_core::TicketFlowManager;
use ticket_flow_core::TicketId;
use ticket_flow_core::TicketStatus;
use ticket_flow_core::TicketStore;
use ticket_flow_core::TicketView;
use tokio::sync::Semaphore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Scheduler failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Manager call failed.
    #[error(transparent)]
    Manager(#[from] ManagerError),
    /// Worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(String),
    /// Scheduler was closed.
    #[error("scheduler is closed")]
    Closed,
}

// ============================================================================
// SECTION: Reports
// ============================================================================

/// Outcome counts for one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tickets visited.
    pub visited: usize,
    /// Tickets that closed during the sweep.
    pub closed: usize,
    /// Tickets still failed after the sweep.
    pub failed: usize,
    /// Tickets whose reconcile call returned an error.
    pub errors: usize,
}

impl SweepReport {
    /// Folds one ticket outcome into the report.
    const fn record(&mut self, status: TicketStatus) {
        self.visited += 1;
        if status.is_closed() {
            self.closed += 1;
        } else if matches!(status, TicketStatus::Failed) {
            self.failed += 1;
        }
    }
}

// ============================================================================
// SECTION: Scheduler
// ============================================================================

/// Async front end for a [`TicketFlowManager`].
pub struct TicketScheduler<S, E, C> {
    /// Shared manager.
    manager: Arc<TicketFlowManager<S, E, C>>,
    /// Worker permits.
    permits: Arc<Semaphore>,
    /// Cap on tickets per sweep.
    max_tickets_per_sweep: usize,
    /// Raw id of the last ticket a capped sweep visited; zero before the first.
    cursor: Arc<AtomicU64>,
}

impl<S, E, C> Clone for TicketScheduler<S, E, C> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            permits: Arc::clone(&self.permits),
            max_tickets_per_sweep: self.max_tickets_per_sweep,
            cursor: Arc::clone(&self.cursor),
        }
    }
}

impl<S, E, C> TicketScheduler<S, E, C>
where
    S: TicketStore + OperateRecordStore + 'static,
    E: DagEngine + 'static,
    C: Clock + 'static,
{
    /// Creates a scheduler sized by the config.
    #[must_use]
    pub fn new(manager: Arc<TicketFlowManager<S, E, C>>, config: &SchedulerConfig) -> Self {
        Self {
            manager,
            permits: Arc::new(Semaphore::new(config.worker_pool_size)),
            max_tickets_per_sweep: config.max_tickets_per_sweep,
            cursor: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the shared manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<TicketFlowManager<S, E, C>> {
        &self.manager
    }

    /// Returns the number of idle workers.
    #[must_use]
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stops accepting new work; running tasks finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Advances one ticket on the worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] when the scheduler is closed, the worker
    /// fails, or the manager rejects the call.
    pub async fn dispatch(&self, ticket_id: TicketId) -> Result<TicketView, SchedulerError> {
        self.run(move |manager| manager.run_next_flow(ticket_id)).await
    }

    /// Handles an engine notification that a ticket's pipeline changed state.
    ///
    /// # Errors
    ///
    /// Same as [`TicketScheduler::dispatch`].
    pub async fn notify(&self, ticket_id: TicketId) -> Result<TicketView, SchedulerError> {
        debug!(ticket_id = %ticket_id, "engine notification received");
        self.dispatch(ticket_id).await
    }

    /// Sweeps open tickets once, reconciling each on the worker pool.
    ///
    /// Per-ticket errors are logged and counted; they do not abort the sweep.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] when listing open tickets fails.
    pub async fn reconcile_once(&self) -> Result<SweepReport, SchedulerError> {
        let mut open = self.run(|manager| manager.list_tickets(TicketFilter::Open)).await?;
        if open.len() > self.max_tickets_per_sweep {
            open.sort_unstable();
            let last = self.cursor.load(Ordering::Relaxed);
            let start = open.partition_point(|ticket_id| ticket_id.get() <= last);
            open.rotate_left(start);
            open.truncate(self.max_tickets_per_sweep);
            if let Some(tail) = open.last() {
                self.cursor.store(tail.get(), Ordering::Relaxed);
            }
            debug!(cap = self.max_tickets_per_sweep, after = last, "sweep capped");
        }
        let mut tasks = JoinSet::new();
        for ticket_id in open {
            let scheduler = self.clone();
            tasks.spawn(async move {
                let outcome =
                    scheduler.run(move |manager| manager.reconcile_ticket(ticket_id)).await;
                (ticket_id, outcome)
            });
        }
        let mut report = SweepReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(view))) => report.record(view.status),
                Ok((ticket_id, Err(err))) => {
                    report.visited += 1;
                    report.errors += 1;
                    warn!(ticket_id = %ticket_id, error = %err, "reconcile failed");
                }
                Err(err) => {
                    report.visited += 1;
                    report.errors += 1;
                    warn!(error = %err, "reconcile task failed");
                }
            }
        }
        info!(
            visited = report.visited,
            closed = report.closed,
            failed = report.failed,
            errors = report.errors,
            "reconcile sweep finished"
        );
        Ok(report)
    }

    /// Runs [`TicketScheduler::reconcile_once`] every `interval` until
    /// `shutdown` becomes true or its sender is dropped.
    #[must_use]
    pub fn spawn_reconciler(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
            info!(interval_ms, "reconciler started");
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(err) = scheduler.reconcile_once().await {
                            warn!(error = %err, "reconcile sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("reconciler stopped");
        })
    }

    /// Runs a manager call on the blocking pool while holding a permit.
    async fn run<T, F>(&self, call: F) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(&TicketFlowManager<S, E, C>) -> Result<T, ManagerError> + Send + 'static,
    {
        let permit =
            Arc::clone(&self.permits).acquire_owned().await.map_err(|_| SchedulerError::Closed)?;
        let manager = Arc::clone(&self.manager);
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = call(manager.as_ref());
            drop(permit);
            outcome
        })
        .await
        .map_err(|err| SchedulerError::Join(err.to_string()))?;
        Ok(joined?)
    }
}
