//! Run configuration: the serde-facing `RunSpec` loaded from YAML/JSON files,
//! and the validated `RampPlan` the scheduler executes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::script::{Check, Script, ScriptStep};
use crate::engine::RunConfig;
use crate::error::{Error, Result};
use crate::stats::thresholds::ThresholdRule;

/// Parse a duration string (e.g., "30s", "500ms", "1m", "1h") into std::time::Duration.
///
/// Supported formats:
/// - `Nms` - milliseconds (e.g., "500ms", "1.5ms")
/// - `Ns` - seconds (e.g., "30s", "1.5s")
/// - `Nm` - minutes (e.g., "5m")
/// - `Nh` - hours (e.g., "1h")
/// - Plain number - treated as milliseconds (e.g., "1000")
///
/// Negative, non-finite and out-of-range values are rejected, not panicked on.
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (value, scale) = if let Some(v) = s.strip_suffix("ms") {
        (v, 0.001)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1.0)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60.0)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3600.0)
    } else {
        (s, 0.001)
    };
    let value: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(value * scale).ok()
}

fn parse_duration_field(s: &str, field: &str) -> Result<Duration> {
    parse_duration_str(s)
        .ok_or_else(|| Error::Config(format!("invalid duration '{}' for {}", s, field)))
}

/// How the desired VU count moves between stage targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampMode {
    /// Interpolate linearly from the previous target across the stage duration.
    #[default]
    Linear,
    /// Jump to the stage target at the stage boundary.
    Step,
}

/// One ramp stage: hold or ramp toward `target` VUs over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

/// The full ramp schedule for one run. Immutable once validated.
#[derive(Debug, Clone)]
pub struct RampPlan {
    pub initial: usize,
    pub stages: Vec<Stage>,
    pub graceful_ramp_down: Duration,
    pub ramp_mode: RampMode,
}

impl RampPlan {
    pub fn new(
        initial: usize,
        stages: Vec<Stage>,
        graceful_ramp_down: Duration,
        ramp_mode: RampMode,
    ) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::Config("ramp plan has no stages".to_string()));
        }
        for (i, stage) in stages.iter().enumerate() {
            if stage.duration.is_zero() {
                return Err(Error::Config(format!(
                    "stage {} has a non-positive duration",
                    i + 1
                )));
            }
        }
        Ok(Self {
            initial,
            stages,
            graceful_ramp_down,
            ramp_mode,
        })
    }

    /// Total scheduled run time, excluding the graceful ramp-down window.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest VU count the plan can reach, used to size pools and shards.
    pub fn peak_target(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.initial)
    }

    /// Desired concurrency at `elapsed` since run start.
    ///
    /// Stage boundaries are cumulative durations. Within a stage the target is
    /// interpolated from the previous stage's target (or `initial` for the
    /// first stage) per `ramp_mode`. Past the last stage the target is 0: the
    /// run is draining.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut stage_start = Duration::ZERO;
        let mut prev_target = self.initial;
        for stage in &self.stages {
            if elapsed < stage_start + stage.duration {
                match self.ramp_mode {
                    RampMode::Step => return stage.target,
                    RampMode::Linear => {
                        let progress = (elapsed.as_secs_f64() - stage_start.as_secs_f64())
                            / stage.duration.as_secs_f64();
                        let diff = stage.target as f64 - prev_target as f64;
                        return (prev_target as f64 + diff * progress).round() as usize;
                    }
                }
            }
            stage_start += stage.duration;
            prev_target = stage.target;
        }
        0
    }
}

/// Serde form of a stage, duration as a string ("30s").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub duration: String,
    pub target: usize,
}

/// Serde form of a script step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub checks: Vec<Check>,
}

/// A complete run specification as loaded from a YAML or JSON file.
///
/// ```yaml
/// stages:
///   - { duration: "30s", target: 1 }
///   - { duration: "30s", target: 50 }
/// graceful_ramp_down: "1s"
/// think_time: "1s"
/// steps:
///   - name: user details
///     url: http://localhost:3000/user
///     checks:
///       - status: 200
/// thresholds:
///   - "p(95) < 500"
///   - "rate < 0.01"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSpec {
    /// Starting VU count for the first stage's ramp (k6: startVUs).
    #[serde(default)]
    pub initial: usize,
    pub stages: Vec<StageSpec>,
    /// Grace window after the last stage during which in-flight iterations may
    /// finish. Default "30s".
    pub graceful_ramp_down: Option<String>,
    #[serde(default)]
    pub ramp_mode: RampMode,
    /// Pause between iterations of one VU. Default none.
    pub think_time: Option<String>,
    /// Per-request timeout; expiry is recorded as a transport failure. Default "30s".
    pub request_timeout: Option<String>,
    pub steps: Vec<StepSpec>,
    /// Ordered threshold list. Several rules over the same metric all apply.
    #[serde(default)]
    pub thresholds: Vec<String>,
    /// Live snapshot emission interval. Default "1s".
    pub snapshot_interval: Option<String>,
    /// Stop the run as soon as a threshold fails.
    #[serde(default)]
    pub abort_on_fail: bool,
}

impl RunSpec {
    /// Validate and resolve into the engine's run configuration.
    pub fn into_config(self) -> Result<RunConfig> {
        let stages = self
            .stages
            .iter()
            .map(|s| {
                Ok(Stage {
                    duration: parse_duration_field(&s.duration, "stage duration")?,
                    target: s.target,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let graceful_ramp_down = match &self.graceful_ramp_down {
            Some(s) => parse_duration_field(s, "graceful_ramp_down")?,
            None => Duration::from_secs(30),
        };
        let plan = RampPlan::new(self.initial, stages, graceful_ramp_down, self.ramp_mode)?;

        let think_time = match &self.think_time {
            Some(s) => parse_duration_field(s, "think_time")?,
            None => Duration::ZERO,
        };
        let steps = self
            .steps
            .into_iter()
            .map(|s| ScriptStep {
                name: s.name,
                url: s.url,
                checks: s.checks,
            })
            .collect();
        let script = Script::new(steps, think_time)?;

        let rules = self
            .thresholds
            .iter()
            .map(|s| s.parse::<ThresholdRule>())
            .collect::<Result<Vec<_>>>()?;

        let request_timeout = match &self.request_timeout {
            Some(s) => parse_duration_field(s, "request_timeout")?,
            None => Duration::from_secs(30),
        };
        let snapshot_interval = match &self.snapshot_interval {
            Some(s) => parse_duration_field(s, "snapshot_interval")?,
            None => Duration::from_secs(1),
        };

        Ok(RunConfig {
            plan,
            script,
            rules,
            request_timeout,
            snapshot_interval,
            abort_on_fail: self.abort_on_fail,
            tick: Duration::from_millis(100),
            quiet: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::thresholds::{Comparator, Metric};

    fn stage(secs: u64, target: usize) -> Stage {
        Stage {
            duration: Duration::from_secs(secs),
            target,
        }
    }

    #[test]
    fn test_parse_durations() {
        assert_eq!(
            parse_duration_str("500ms"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(parse_duration_str("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration_str("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration_str("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration_str("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration_str("1000"), Some(Duration::from_millis(1000)));
        assert_eq!(
            parse_duration_str("1.5ms"),
            Some(Duration::from_micros(1500))
        );
        assert_eq!(parse_duration_str("abc"), None);
    }

    #[test]
    fn test_parse_rejects_negative_and_nonfinite_durations() {
        assert_eq!(parse_duration_str("-5s"), None);
        assert_eq!(parse_duration_str("-1ms"), None);
        assert_eq!(parse_duration_str("NaNs"), None);
        assert_eq!(parse_duration_str("infs"), None);
        // Overflows Duration's range rather than fitting it.
        assert_eq!(parse_duration_str("9e30s"), None);
    }

    #[test]
    fn test_plan_rejects_zero_duration_stage() {
        let err = RampPlan::new(
            1,
            vec![stage(30, 50), Stage { duration: Duration::ZERO, target: 10 }],
            Duration::from_secs(1),
            RampMode::Linear,
        )
        .unwrap_err();
        assert!(err.to_string().contains("stage 2"));
    }

    #[test]
    fn test_plan_rejects_empty_stages() {
        assert!(RampPlan::new(1, vec![], Duration::ZERO, RampMode::Linear).is_err());
    }

    #[test]
    fn test_linear_interpolation() {
        let plan = RampPlan::new(
            0,
            vec![stage(10, 10), stage(10, 100)],
            Duration::ZERO,
            RampMode::Linear,
        )
        .unwrap();

        assert_eq!(plan.target_at(Duration::ZERO), 0);
        assert_eq!(plan.target_at(Duration::from_secs(5)), 5);
        assert_eq!(plan.target_at(Duration::from_secs(10)), 10);
        assert_eq!(plan.target_at(Duration::from_secs(15)), 55);
        // Past the last stage the plan drains.
        assert_eq!(plan.target_at(Duration::from_secs(20)), 0);
        assert_eq!(plan.target_at(Duration::from_secs(100)), 0);
    }

    #[test]
    fn test_warmup_stage_holds_initial() {
        // Matches the ramping-vus shape: startVUs=1, first stage holds 1.
        let plan = RampPlan::new(
            1,
            vec![stage(30, 1), stage(30, 50)],
            Duration::from_secs(1),
            RampMode::Linear,
        )
        .unwrap();
        assert_eq!(plan.target_at(Duration::from_secs(0)), 1);
        assert_eq!(plan.target_at(Duration::from_secs(15)), 1);
        assert_eq!(plan.target_at(Duration::from_secs(45)), 26);
        assert_eq!(plan.peak_target(), 50);
        assert_eq!(plan.total_duration(), Duration::from_secs(60));
    }

    #[test]
    fn test_step_mode_jumps_at_boundaries() {
        let plan = RampPlan::new(
            0,
            vec![stage(10, 10), stage(10, 100)],
            Duration::ZERO,
            RampMode::Step,
        )
        .unwrap();
        assert_eq!(plan.target_at(Duration::from_secs(1)), 10);
        assert_eq!(plan.target_at(Duration::from_secs(9)), 10);
        assert_eq!(plan.target_at(Duration::from_secs(10)), 100);
        assert_eq!(plan.target_at(Duration::from_secs(19)), 100);
    }

    #[test]
    fn test_run_spec_from_yaml() {
        let yaml = r#"
initial: 1
stages:
  - { duration: "30s", target: 1 }
  - { duration: "30s", target: 50 }
graceful_ramp_down: "1s"
think_time: "1s"
steps:
  - name: user details
    url: http://localhost:3000/user
    checks:
      - status: 200
  - name: products
    url: http://localhost:3000/products
    checks:
      - status: 200
thresholds:
  - "p(99) < 1000"
  - "p(95) < 500"
  - "p(90) < 200"
  - "rate < 0.01"
"#;
        let spec: RunSpec = serde_yaml::from_str(yaml).unwrap();
        let config = spec.into_config().unwrap();

        assert_eq!(config.plan.initial, 1);
        assert_eq!(config.plan.stages.len(), 2);
        assert_eq!(config.plan.graceful_ramp_down, Duration::from_secs(1));
        assert_eq!(config.script.steps.len(), 2);
        assert_eq!(config.script.think_time, Duration::from_secs(1));

        // All three duration-percentile rules survive as independent entries.
        assert_eq!(config.rules.len(), 4);
        assert_eq!(config.rules[0].percentile, Some(99.0));
        assert_eq!(config.rules[1].percentile, Some(95.0));
        assert_eq!(config.rules[2].percentile, Some(90.0));
        assert_eq!(config.rules[3].metric, Metric::FailureRate);
        assert_eq!(config.rules[3].comparator, Comparator::Lt);
    }

    #[test]
    fn test_run_spec_from_json() {
        let json = r#"{
            "stages": [{"duration": "10s", "target": 5}],
            "steps": [{"name": "hello", "url": "http://localhost:3000/",
                       "checks": [{"status": 200}, {"body": "Hello Elysia"}]}],
            "thresholds": ["p(99) < 1000"]
        }"#;
        let spec: RunSpec = serde_yaml::from_str(json).unwrap();
        let config = spec.into_config().unwrap();
        assert_eq!(config.script.steps[0].checks.len(), 2);
        assert_eq!(config.script.think_time, Duration::ZERO);
    }

    #[test]
    fn test_run_spec_bad_duration_rejected() {
        let spec = RunSpec {
            stages: vec![StageSpec {
                duration: "soon".to_string(),
                target: 5,
            }],
            steps: vec![StepSpec {
                name: "hello".to_string(),
                url: "http://localhost:3000/".to_string(),
                checks: vec![],
            }],
            ..Default::default()
        };
        let err = spec.into_config().unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn test_run_spec_negative_duration_rejected() {
        // A negative grace window must surface as a config error, not a panic.
        let spec = RunSpec {
            stages: vec![StageSpec {
                duration: "10s".to_string(),
                target: 5,
            }],
            graceful_ramp_down: Some("-5s".to_string()),
            steps: vec![StepSpec {
                name: "hello".to_string(),
                url: "http://localhost:3000/".to_string(),
                checks: vec![],
            }],
            ..Default::default()
        };
        let err = spec.into_config().unwrap_err();
        assert!(err.to_string().contains("graceful_ramp_down"));
    }

    #[test]
    fn test_run_spec_bad_threshold_rejected() {
        let spec = RunSpec {
            stages: vec![StageSpec {
                duration: "10s".to_string(),
                target: 5,
            }],
            steps: vec![StepSpec {
                name: "hello".to_string(),
                url: "http://localhost:3000/".to_string(),
                checks: vec![],
            }],
            thresholds: vec!["p(150) < 500".to_string()],
            ..Default::default()
        };
        assert!(spec.into_config().is_err());
    }
}
