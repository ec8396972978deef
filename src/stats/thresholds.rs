//! Declarative pass/fail rules over metric snapshots.
//!
//! Rules are kept as an ordered list so several thresholds over the same
//! metric (e.g. p90/p95/p99 over request duration) all take effect; a keyed
//! map would silently keep only the last one.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::Error;
use crate::stats::MetricSnapshot;

/// The aggregated quantity a rule constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Request latency at a percentile, in milliseconds.
    Duration,
    /// Fraction of failed requests in [0, 1].
    FailureRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparator {
    fn compare(self, observed: f64, bound: f64) -> bool {
        match self {
            Comparator::Lt => observed < bound,
            Comparator::Lte => observed <= bound,
            Comparator::Gt => observed > bound,
            Comparator::Gte => observed >= bound,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
        };
        f.write_str(s)
    }
}

/// One Service-Level rule, declared before the run and immutable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdRule {
    pub metric: Metric,
    /// Required for `Metric::Duration`, in [0, 100].
    pub percentile: Option<f64>,
    pub comparator: Comparator,
    pub bound: f64,
}

impl ThresholdRule {
    pub fn duration_percentile(
        percentile: f64,
        comparator: Comparator,
        bound_ms: f64,
    ) -> Result<Self, Error> {
        if !(0.0..=100.0).contains(&percentile) {
            return Err(Error::Config(format!(
                "percentile {} out of range [0, 100]",
                percentile
            )));
        }
        Ok(Self {
            metric: Metric::Duration,
            percentile: Some(percentile),
            comparator,
            bound: bound_ms,
        })
    }

    pub fn failure_rate(comparator: Comparator, bound: f64) -> Self {
        Self {
            metric: Metric::FailureRate,
            percentile: None,
            comparator,
            bound,
        }
    }

    /// Read this rule's observed value out of a snapshot.
    pub fn observe(&self, snapshot: &MetricSnapshot) -> f64 {
        match self.metric {
            Metric::Duration => snapshot.percentile_ms(self.percentile.unwrap_or(50.0)),
            Metric::FailureRate => snapshot.failure_rate,
        }
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.metric {
            Metric::Duration => write!(
                f,
                "p({}) {} {}",
                self.percentile.unwrap_or(50.0),
                self.comparator,
                self.bound
            ),
            Metric::FailureRate => write!(f, "rate {} {}", self.comparator, self.bound),
        }
    }
}

impl FromStr for ThresholdRule {
    type Err = Error;

    /// Parses the k6-style grammar: `p(95) < 500`, `p(99)<=1000`, `rate < 0.01`.
    fn from_str(s: &str) -> Result<Self, Error> {
        let bad = || Error::Config(format!("invalid threshold '{}'", s));
        let s = s.trim();

        let (op_idx, op_len, comparator) = ["<=", ">=", "<", ">"]
            .iter()
            .find_map(|op| s.find(op).map(|i| (i, op.len(), *op)))
            .ok_or_else(bad)?;
        let comparator = match comparator {
            "<=" => Comparator::Lte,
            ">=" => Comparator::Gte,
            "<" => Comparator::Lt,
            _ => Comparator::Gt,
        };

        let lhs = s[..op_idx].trim();
        let bound: f64 = s[op_idx + op_len..].trim().parse().map_err(|_| bad())?;

        if lhs.eq_ignore_ascii_case("rate") {
            Ok(ThresholdRule::failure_rate(comparator, bound))
        } else if let Some(p) = lhs
            .strip_prefix("p(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let percentile: f64 = p.trim().parse().map_err(|_| bad())?;
            ThresholdRule::duration_percentile(percentile, comparator, bound)
        } else {
            Err(Error::Config(format!(
                "unknown threshold metric '{}' in '{}'",
                lhs, s
            )))
        }
    }
}

/// Outcome of evaluating one rule against one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RuleResult {
    pub rule: ThresholdRule,
    pub observed: f64,
    pub passed: bool,
}

/// Evaluate every rule independently against the snapshot. Read-only and
/// reentrant; safe to call repeatedly during a run and once at run end.
pub fn evaluate(rules: &[ThresholdRule], snapshot: &MetricSnapshot) -> Vec<RuleResult> {
    rules
        .iter()
        .map(|rule| {
            let observed = rule.observe(snapshot);
            RuleResult {
                rule: rule.clone(),
                observed,
                passed: rule.comparator.compare(observed, rule.bound),
            }
        })
        .collect()
}

/// The terminal artifact of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub snapshot: MetricSnapshot,
    pub rules: Vec<RuleResult>,
    pub passed: bool,
}

impl RunReport {
    pub fn new(snapshot: MetricSnapshot, rules: Vec<RuleResult>) -> Self {
        let passed = rules.iter().all(|r| r.passed);
        Self {
            snapshot,
            rules,
            passed,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Console summary, printed once at run end.
    pub fn print(&self) {
        let s = &self.snapshot;
        println!("\n--- Run Summary ---");
        if s.count == 0 {
            println!("No requests were made.");
        } else {
            println!("Total Requests: {}", s.count);
            println!(
                "Failed:         {} ({:.2}%) [{} transport, {} check]",
                s.failed,
                s.failure_rate * 100.0,
                s.transport_failures,
                s.check_failures
            );
            println!("Avg Latency:    {:.2} ms", s.avg_ms);
            println!("Min Latency:    {:.2} ms", s.min_ms);
            println!("Max Latency:    {:.2} ms", s.max_ms);
            println!("P50 Latency:    {:.2} ms", s.p50_ms);
            println!("P90 Latency:    {:.2} ms", s.p90_ms);
            println!("P95 Latency:    {:.2} ms", s.p95_ms);
            println!("P99 Latency:    {:.2} ms", s.p99_ms);

            println!("\nStatus Codes:");
            for (code, count) in &s.status_codes {
                println!("  {}: {}", code, count);
            }
        }

        if !s.checks.is_empty() {
            println!("\nChecks:");
            for (name, stats) in &s.checks {
                let fails = stats.total - stats.passes;
                let percent = stats.passes as f64 / stats.total.max(1) as f64 * 100.0;
                if fails > 0 {
                    println!(
                        "  ✗ {} : {:.2}% ({} passed, {} failed)",
                        name, percent, stats.passes, fails
                    );
                } else {
                    println!("  ✓ {} : 100% ({} passed)", name, stats.passes);
                }
            }
        }

        if !s.errors.is_empty() {
            println!("\nErrors:");
            for (err, count) in &s.errors {
                println!("  {}: {}", err, count);
            }
        }

        if s.abandoned_iterations > 0 {
            println!(
                "\nIncomplete iterations (cut off at shutdown): {}",
                s.abandoned_iterations
            );
        }

        if !self.rules.is_empty() {
            println!("\nThresholds:");
            for result in &self.rules {
                let mark = if result.passed { "✓" } else { "✗" };
                println!(
                    "  {} {} (observed: {:.2})",
                    mark, result.rule, result.observed
                );
            }
        }

        println!(
            "\nResult: {}",
            if self.passed { "PASSED" } else { "FAILED" }
        );
        println!("-------------------\n");
    }
}
