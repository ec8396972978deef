//! Run orchestration: wires the script, HTTP client, scheduler and stats sink
//! together, drives the live progress line, and produces the final report.

pub mod http_client;
pub mod scheduler;
pub mod script;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::config::RampPlan;
use crate::error::Result;
use crate::stats::thresholds::{evaluate, RunReport, ThresholdRule};
use crate::stats::ShardedAggregator;
use http_client::HttpClient;
use scheduler::Scheduler;
use script::{Script, ScriptRunner};

/// Trailing window the live line computes latency and error rate over.
const LIVE_WINDOW: Duration = Duration::from_secs(10);

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub plan: RampPlan,
    pub script: Script,
    pub rules: Vec<ThresholdRule>,
    pub request_timeout: Duration,
    pub snapshot_interval: Duration,
    pub abort_on_fail: bool,
    /// Scheduler reconciliation interval.
    pub tick: Duration,
    /// Suppress the live progress line.
    pub quiet: bool,
}

pub struct Engine {
    config: RunConfig,
}

impl Engine {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Execute the run to completion and evaluate thresholds over the final
    /// cumulative snapshot. Threshold failure is part of the report, not an
    /// `Err`; `Err` means the run itself could not be executed.
    pub async fn run(self) -> Result<RunReport> {
        let RunConfig {
            plan,
            script,
            rules,
            request_timeout,
            snapshot_interval,
            abort_on_fail,
            tick,
            quiet,
        } = self.config;

        let peak = plan.peak_target();
        let stats = Arc::new(ShardedAggregator::for_vus(peak));
        let client = HttpClient::for_vus(peak);
        let runner = Arc::new(ScriptRunner::new(script, client, stats.clone(), request_timeout)?);

        let scheduler = Scheduler::new(plan, runner).with_tick(tick);
        let gauge = scheduler.active_gauge();
        let stop = scheduler.stop_flag();

        let reporter = {
            let stats = stats.clone();
            let rules = rules.clone();
            let stop = stop.clone();
            let start = Instant::now();
            tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval_at(start + snapshot_interval, snapshot_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let recent = stats.snapshot_window(LIVE_WINDOW);
                    let overall = stats.snapshot();
                    if !quiet {
                        println!(
                            "[{:>4}s] vus={} reqs={} failed={} p95={:.1}ms err={:.2}%",
                            start.elapsed().as_secs(),
                            gauge.load(Ordering::Relaxed),
                            overall.count,
                            overall.failed,
                            recent.p95_ms,
                            recent.failure_rate * 100.0,
                        );
                    }
                    if abort_on_fail {
                        let breached = evaluate(&rules, &overall)
                            .iter()
                            .any(|r| !r.passed && overall.count > 0);
                        if breached {
                            eprintln!("threshold breached, aborting run");
                            stop.store(true, Ordering::Relaxed);
                            break;
                        }
                    }
                }
            })
        };

        let summary = scheduler.run().await;
        reporter.abort();

        for _ in 0..summary.force_stopped {
            stats.record_abandoned();
        }

        let snapshot = stats.snapshot();
        let results = evaluate(&rules, &snapshot);
        Ok(RunReport::new(snapshot, results))
    }
}
