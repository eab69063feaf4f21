// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::reconciler::{PassReport, Reconciler};

/// Identifies one reconciliation pass. A pass keeps going only while its
/// generation is still the active one.
#[derive(Debug, Clone)]
pub struct PassToken {
    generation: u64,
    active: Arc<AtomicU64>,
}

impl PassToken {
    /// A token not tied to any scheduler.
    #[cfg(test)]
    pub fn detached(generation: u64) -> Self {
        Self {
            generation,
            active: Arc::new(AtomicU64::new(generation)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.active.load(Ordering::SeqCst) == self.generation
    }

    /// Record a newer generation so this pass stops at its next server boundary.
    #[cfg(test)]
    pub fn supersede(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }
}

pub type SharedReport = Arc<RwLock<Option<PassReport>>>;

/// Single-flight, fixed-period trigger for reconciliation passes.
///
/// The reconciler sits behind an async mutex; a trigger that cannot take it
/// immediately is dropped, never queued.
#[derive(Clone)]
pub struct Scheduler {
    reconciler: Arc<Mutex<Reconciler>>,
    period: Duration,
    active: Arc<AtomicU64>,
    last_report: SharedReport,
}

impl Scheduler {
    pub fn new(reconciler: Reconciler, period: Duration) -> Self {
        Self {
            reconciler: Arc::new(Mutex::new(reconciler)),
            period,
            active: Arc::new(AtomicU64::new(0)),
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    pub fn last_report(&self) -> SharedReport {
        Arc::clone(&self.last_report)
    }

    /// Start a pass unless one is already in flight.
    pub fn trigger(&self) -> Option<JoinHandle<()>> {
        let guard = match Arc::clone(&self.reconciler).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("reconciliation pass still running; trigger dropped");
                return None;
            }
        };

        let generation = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let token = PassToken {
            generation,
            active: Arc::clone(&self.active),
        };
        let last_report = Arc::clone(&self.last_report);
        Some(tokio::spawn(async move {
            let mut reconciler = guard;
            let report = reconciler.run_pass(&token).await;
            drop(reconciler);
            *last_report.write().await = Some(report);
        }))
    }

    /// Abandon the in-flight pass, if any, at its next server boundary.
    pub fn supersede(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Trigger immediately, then once per period measured from each trigger,
    /// until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        info!(period_seconds = self.period.as_secs_f64(), "scheduler started");

        let mut in_flight: Option<JoinHandle<()>> = None;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(handle) = self.trigger() {
                        in_flight = Some(handle);
                    }
                }
                _ = &mut shutdown => {
                    info!("scheduler stopping; superseding in-flight pass");
                    self.supersede();
                    break;
                }
            }
        }

        if let Some(handle) = in_flight {
            if let Err(error) = handle.await {
                warn!(error = %error, "reconciliation pass task failed");
            }
        }
        self.reconciler.lock().await.flush_store();
    }
}
