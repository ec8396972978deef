//! VU scheduler: keeps the pool of running VU tasks tracking the ramp plan's
//! target over wall-clock time, and drains it gracefully at the end.
//!
//! Each VU is an independent tokio task looping over the workload. Draining
//! is cooperative: the flag is checked only between iterations, so a drained
//! VU always finishes its current iteration (think-time included) and never
//! starts another. Only the terminal grace-window expiry aborts tasks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::RampPlan;
use crate::engine::script::Workload;

/// Lifecycle of one VU, owned exclusively by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VuState {
    Starting,
    Running,
    Draining,
    Stopped,
}

struct VuHandle {
    started: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl VuHandle {
    fn state(&self) -> VuState {
        if self.handle.is_finished() {
            VuState::Stopped
        } else if self.draining.load(Ordering::Relaxed) {
            VuState::Draining
        } else if !self.started.load(Ordering::Relaxed) {
            VuState::Starting
        } else {
            VuState::Running
        }
    }
}

/// What happened to the VU population by the time the run ended.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerSummary {
    /// Total VUs started over the whole run.
    pub spawned: u64,
    /// VUs aborted mid-iteration at grace-window expiry.
    pub force_stopped: u64,
}

/// Drives a pool of VU tasks along a `RampPlan`.
pub struct Scheduler {
    plan: RampPlan,
    workload: Arc<dyn Workload>,
    tick: Duration,
    active_gauge: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(plan: RampPlan, workload: Arc<dyn Workload>) -> Self {
        Self {
            plan,
            workload,
            tick: Duration::from_millis(100),
            active_gauge: Arc::new(AtomicUsize::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Live count of VUs still executing (running or draining).
    pub fn active_gauge(&self) -> Arc<AtomicUsize> {
        self.active_gauge.clone()
    }

    /// Setting this flag ends the ramp early and moves straight to draining.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn spawn_vu(&self, id: u64) -> VuHandle {
        let started = Arc::new(AtomicBool::new(false));
        let draining = Arc::new(AtomicBool::new(false));
        let started_flag = started.clone();
        let flag = draining.clone();
        let workload = self.workload.clone();
        let handle = tokio::spawn(async move {
            started_flag.store(true, Ordering::Relaxed);
            while !flag.load(Ordering::Relaxed) {
                workload.iterate(id).await;
            }
        });
        VuHandle {
            started,
            draining,
            handle,
        }
    }

    /// Run the plan to completion. Returns once every VU has stopped or been
    /// force-stopped at the end of the grace window.
    pub async fn run(self) -> SchedulerSummary {
        let start = Instant::now();
        let total = self.plan.total_duration();

        // Scale-down retires the newest VUs first, so `pool` works as a stack.
        let mut pool: Vec<VuHandle> = Vec::new();
        let mut draining: Vec<VuHandle> = Vec::new();
        let mut next_id: u64 = 1;
        let mut summary = SchedulerSummary::default();

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let elapsed = start.elapsed();
            if elapsed >= total || self.stop.load(Ordering::Relaxed) {
                break;
            }

            let target = self.plan.target_at(elapsed);
            while pool.len() < target {
                pool.push(self.spawn_vu(next_id));
                next_id += 1;
                summary.spawned += 1;
            }
            while pool.len() > target {
                let Some(vu) = pool.pop() else { break };
                vu.draining.store(true, Ordering::Relaxed);
                draining.push(vu);
            }
            draining.retain(|vu| vu.state() != VuState::Stopped);

            self.active_gauge
                .store(pool.len() + draining.len(), Ordering::Relaxed);
        }

        // Terminal grace window: stop handing out iterations, let in-flight
        // ones finish until the window expires.
        for vu in pool.drain(..) {
            vu.draining.store(true, Ordering::Relaxed);
            draining.push(vu);
        }

        let deadline = Instant::now() + self.plan.graceful_ramp_down;
        loop {
            draining.retain(|vu| vu.state() != VuState::Stopped);
            self.active_gauge.store(draining.len(), Ordering::Relaxed);
            if draining.is_empty() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.tick.min(deadline - now)).await;
        }

        for vu in draining {
            vu.handle.abort();
            summary.force_stopped += 1;
        }
        self.active_gauge.store(0, Ordering::Relaxed);
        summary
    }
}
