// Plugverify
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Periodic re-verification of a plan of requests
//!
//! Every round the plan is evaluated again and requests without a stored
//! result and not already queued are submitted. Earlier plan entries get
//! higher priority. Results live in memory only.

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use plugverify_core::VerificationResult;

use crate::error::{TaskError, TaskResult};
use crate::scheduler::{CancellationToken, ResultSink, TaskId, TaskScheduler};
use crate::verify_task::{VerificationRequest, VerificationServices, VerifyPluginTask};

pub type VerificationPlan = Arc<dyn Fn() -> Vec<VerificationRequest> + Send + Sync>;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct RecheckState {
    scheduler: Arc<TaskScheduler<u64>>,
    services: VerificationServices,
    plan: VerificationPlan,
    results: Arc<DashMap<VerificationRequest, VerificationResult>>,
    in_flight: Arc<DashSet<VerificationRequest>>,
}

struct StoreResult {
    request: VerificationRequest,
    results: Arc<DashMap<VerificationRequest, VerificationResult>>,
    in_flight: Arc<DashSet<VerificationRequest>>,
}

impl ResultSink<VerificationResult> for StoreResult {
    fn on_result(&self, task: TaskId, result: &TaskResult<VerificationResult>) {
        match result {
            Ok(result) => {
                self.results.insert(self.request.clone(), result.clone());
            }
            Err(error) => debug!(task_id = %task, request = %self.request, error = %error, "Re-check produced no result"),
        }
        self.in_flight.remove(&self.request);
    }
}

impl RecheckState {
    /// Submits every pending request; returns how many were submitted
    fn run_once(&self) -> usize {
        let plan = (self.plan)();
        let total = plan.len() as u64;
        let mut submitted = 0;

        for (index, request) in plan.into_iter().enumerate() {
            if self.results.contains_key(&request) || !self.in_flight.insert(request.clone()) {
                continue;
            }
            let sink = Arc::new(StoreResult {
                request: request.clone(),
                results: Arc::clone(&self.results),
                in_flight: Arc::clone(&self.in_flight),
            });
            let task = VerifyPluginTask::new(request.clone(), self.services.clone());
            match self.scheduler.submit_with_sink(total - index as u64, task, sink) {
                Ok(_) => submitted += 1,
                Err(TaskError::SchedulerShutDown) => {
                    self.in_flight.remove(&request);
                    warn!("Scheduler is shut down, skipping re-check round");
                    break;
                }
                Err(error) => {
                    self.in_flight.remove(&request);
                    error!(request = %request, error = %error, "Failed to submit re-check");
                }
            }
        }
        if submitted > 0 {
            info!(submitted, "Submitted re-checks");
        }
        submitted
    }
}

/// Background service re-verifying a plan at a fixed interval
pub struct RecheckService {
    state: Arc<RecheckState>,
    stop: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RecheckService {
    pub fn start(scheduler: Arc<TaskScheduler<u64>>, services: VerificationServices, plan: VerificationPlan, interval: Duration) -> Self {
        let state = Arc::new(RecheckState {
            scheduler,
            services,
            plan,
            results: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashSet::new()),
        });
        let stop = CancellationToken::new();

        let worker_state = Arc::clone(&state);
        let worker_stop = stop.clone();
        let worker = thread::Builder::new().name("plugverify-recheck".to_string()).spawn(move || {
            info!(interval_ms = interval.as_millis() as u64, "Re-check service started");
            while !worker_stop.is_cancelled() {
                worker_state.run_once();
                let round_started = Instant::now();
                while round_started.elapsed() < interval && !worker_stop.is_cancelled() {
                    thread::sleep(STOP_POLL_INTERVAL.min(interval));
                }
            }
            info!("Re-check service stopped");
        });
        let worker = match worker {
            Ok(worker) => Some(worker),
            Err(error) => {
                error!(error = %error, "Failed to spawn re-check thread");
                None
            }
        };

        Self {
            state,
            stop,
            worker: Mutex::new(worker),
        }
    }

    /// Runs one round on the calling thread
    pub fn check_now(&self) -> usize {
        self.state.run_once()
    }

    pub fn result(&self, request: &VerificationRequest) -> Option<VerificationResult> {
        self.state.results.get(request).map(|entry| entry.value().clone())
    }

    pub fn results(&self) -> Vec<VerificationResult> {
        self.state.results.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state.in_flight.len()
    }

    /// Forgets the stored result so the next round verifies `request` again
    pub fn forget(&self, request: &VerificationRequest) -> bool {
        self.state.results.remove(request).is_some()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn stop(&self) {
        self.stop.cancel("Re-check service stopped");
        if let Some(worker) = self.worker.lock().take()
            && worker.join().is_err()
        {
            error!("Re-check thread panicked");
        }
    }
}

impl Drop for RecheckService {
    fn drop(&mut self) {
        self.stop();
    }
}
