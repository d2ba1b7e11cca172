//! Fleet-wide scheduling.
//!
//! A fleet pass reconciles every server concurrently, one tokio task per server. Two
//! pieces of shared state keep passes from stepping on each other:
//!
//! - the fleet busy flag, flipped with a compare-and-swap, so at most one pass runs and
//!   triggers arriving meanwhile are dropped rather than queued;
//! - the per-server in-flight set, so a server is never reconciled twice at once, no matter
//!   whether the reconciliation came from a pass or a manual single-server trigger.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use itertools::{zip, Itertools};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::TriggerError;
use crate::probe::Readiness;
use crate::reconcile::{ReconciliationResult, Reconciler};
use crate::server::Server;
use crate::session::Session;

/// Indices of servers that currently have a reconciliation running.
#[derive(Debug, Default)]
pub struct InFlight {
    occupied: Mutex<HashSet<usize>>,
}

impl InFlight {
    /// Claims the server's slot, or returns `None` if it is already taken.
    ///
    /// The slot is released when the returned guard is dropped.
    pub fn claim(self: &Arc<Self>, index: usize) -> Option<InFlightGuard> {
        let mut occupied = self.occupied.lock().unwrap_or_else(PoisonError::into_inner);
        if occupied.insert(index) {
            Some(InFlightGuard {
                slots: Arc::clone(self),
                index,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.occupied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&index)
    }

    /// Sorted snapshot of the occupied indices.
    pub fn snapshot(&self) -> Vec<usize> {
        let occupied = self.occupied.lock().unwrap_or_else(PoisonError::into_inner);
        occupied.iter().copied().sorted().collect()
    }

    fn release(&self, index: usize) {
        self.occupied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index);
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    slots: Arc<InFlight>,
    index: usize,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.slots.release(self.index);
    }
}

/// Held for the duration of a fleet pass. Dropping it returns the scheduler to idle.
#[derive(Debug)]
pub struct PassGuard(Arc<AtomicBool>);

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedServer {
    pub index: usize,
    pub server: Server,
}

/// Aggregated outcome of one fleet pass.
#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per reconciled server, ordered by server index.
    pub results: Vec<ReconciliationResult>,
    /// Servers left out because a reconciliation for them was already in flight.
    pub skipped: Vec<SkippedServer>,
}

impl FleetReport {
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(ReconciliationResult::is_failure)
    }

    pub fn ready_count(&self) -> usize {
        self.results
            .iter()
            .filter(|result| result.readiness.is_ready())
            .count()
    }
}

/// Live readiness of one server, as shown by the status views.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub index: usize,
    pub server: Server,
    pub cache_loaded: bool,
    pub in_flight: bool,
}

pub struct FleetScheduler {
    sessions: Vec<Arc<dyn Session>>,
    reconciler: Reconciler,
    busy: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
    cancel: CancellationToken,
}

impl FleetScheduler {
    pub fn new(sessions: Vec<Arc<dyn Session>>, reconciler: Reconciler) -> Self {
        Self {
            sessions,
            reconciler,
            busy: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(InFlight::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn servers(&self) -> impl Iterator<Item = &Server> {
        self.sessions.iter().map(|session| session.server())
    }

    pub fn server_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> Vec<usize> {
        self.in_flight.snapshot()
    }

    /// Stops the interval loop and makes every waiter stop observing its job.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn begin_pass(&self) -> Result<PassGuard, TriggerError> {
        if self.sessions.is_empty() {
            return Err(TriggerError::NoServers);
        }
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| PassGuard(Arc::clone(&self.busy)))
            .map_err(|_| TriggerError::Busy)
    }

    fn session(&self, index: usize) -> Result<&Arc<dyn Session>, TriggerError> {
        self.sessions
            .get(index)
            .ok_or(TriggerError::NoSuchServer(index))
    }

    /// Runs one fleet pass and waits for every server to finish.
    pub async fn run_pass(&self) -> Result<FleetReport, TriggerError> {
        let guard = self.begin_pass()?;
        Ok(self.execute_pass(guard).await)
    }

    /// Starts a fleet pass in the background and returns as soon as it has started.
    ///
    /// The caller never sees the pass's outcome; it is only logged.
    pub fn trigger_pass(self: &Arc<Self>) -> Result<(), TriggerError> {
        let guard = self.begin_pass()?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute_pass(guard).await;
        });
        Ok(())
    }

    async fn execute_pass(&self, _guard: PassGuard) -> FleetReport {
        let started_at = Utc::now();
        info!(servers = self.sessions.len(), "fleet pass started");

        let mut reconciled = Vec::with_capacity(self.sessions.len());
        let mut tasks = Vec::with_capacity(self.sessions.len());
        let mut skipped = vec![];

        for (index, session) in self.sessions.iter().enumerate() {
            let Some(slot) = self.in_flight.claim(index) else {
                warn!(server = %session.server().label(), index, "reconciliation already in flight, skipping");
                skipped.push(SkippedServer {
                    index,
                    server: session.server().clone(),
                });
                continue;
            };
            reconciled.push((index, session.server()));
            tasks.push(spawn_reconcile(
                Arc::clone(session),
                index,
                self.reconciler.clone(),
                self.cancel.clone(),
                slot,
            ));
        }

        // Servers were spawned in index order, so results come back in index order.
        let results = zip(reconciled, join_all(tasks).await)
            .map(|((index, server), joined)| match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(server = %server.label(), index, error = %e, "reconciliation task died");
                    ReconciliationResult::crashed(index, server.clone(), started_at, e.to_string())
                }
            })
            .collect::<Vec<_>>();

        let report = FleetReport {
            started_at,
            finished_at: Utc::now(),
            results,
            skipped,
        };
        info!(
            reconciled = report.results.len(),
            ready = report.ready_count(),
            skipped = report.skipped.len(),
            failures = report.has_failures(),
            "fleet pass finished"
        );
        report
    }

    /// Reconciles a single server and waits for the result.
    ///
    /// Bypasses the fleet busy flag but not the server's own in-flight slot.
    pub async fn reconcile_one(&self, index: usize) -> Result<ReconciliationResult, TriggerError> {
        let session = self.session(index)?;
        let _slot = self
            .in_flight
            .claim(index)
            .ok_or(TriggerError::InFlight(index))?;
        Ok(self
            .reconciler
            .reconcile(index, session.as_ref(), &self.cancel)
            .await)
    }

    /// Starts reconciling a single server in the background.
    ///
    /// The slot is claimed before returning, so a second trigger for the same server is
    /// rejected immediately instead of producing a duplicate submission.
    pub fn trigger_one(self: &Arc<Self>, index: usize) -> Result<(), TriggerError> {
        let session = Arc::clone(self.session(index)?);
        let slot = self
            .in_flight
            .claim(index)
            .ok_or(TriggerError::InFlight(index))?;
        // Nobody awaits the result; the reconciler logs the outcome.
        drop(spawn_reconcile(
            session,
            index,
            self.reconciler.clone(),
            self.cancel.clone(),
            slot,
        ));
        Ok(())
    }

    /// Probes every server concurrently without reconciling anything.
    pub async fn statuses(&self) -> Vec<ServerStatus> {
        let probes = self.sessions.iter().enumerate().map(|(index, session)| async move {
            let readiness = self.reconciler.readiness(session.as_ref()).await;
            ServerStatus {
                index,
                server: session.server().clone(),
                cache_loaded: readiness == Readiness::Ready,
                in_flight: self.in_flight.contains(index),
            }
        });
        join_all(probes).await
    }

    /// Runs a fleet pass immediately and then every `interval` until shutdown.
    ///
    /// A tick that lands while a pass is still running is dropped.
    pub async fn run_interval(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?interval, "scheduled cache checks started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.trigger_pass() {
                Ok(()) => {}
                Err(TriggerError::Busy) => info!("previous fleet pass still running, skipping tick"),
                Err(e) => error!(error = %e, "scheduled fleet pass not started"),
            }
        }
        info!("scheduled cache checks stopped");
    }
}

/// Spawns a task reconciling one server, holding its in-flight slot until done.
fn spawn_reconcile(
    session: Arc<dyn Session>,
    index: usize,
    reconciler: Reconciler,
    cancel: CancellationToken,
    slot: InFlightGuard,
) -> JoinHandle<ReconciliationResult> {
    tokio::spawn(async move {
        let _slot = slot;
        reconciler.reconcile(index, session.as_ref(), &cancel).await
    })
}
