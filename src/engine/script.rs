//! The per-iteration request script: a fixed, ordered list of GETs with
//! response checks, followed by a think-time pause.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use http::Uri;
use serde::{Deserialize, Serialize};

use crate::engine::http_client::{HttpClient, TimedResponse};
use crate::error::{Error, Result};
use crate::stats::{RequestOutcome, Sample, ShardedAggregator};

/// A named boolean predicate over a received response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Check {
    /// Status code equality.
    Status(u16),
    /// Exact body match.
    Body(String),
    /// Header presence.
    Header(String),
}

impl Check {
    /// Label under which this check's pass/fail counts are reported.
    pub fn label(&self, step: &str) -> String {
        match self {
            Check::Status(code) => format!("{}: status is {}", step, code),
            Check::Body(_) => format!("{}: body matches", step),
            Check::Header(name) => format!("{}: has header {}", step, name),
        }
    }

    fn passes(&self, response: &TimedResponse) -> bool {
        match self {
            Check::Status(code) => response.status == *code,
            Check::Body(expected) => response.body.as_ref() == expected.as_bytes(),
            Check::Header(name) => response.headers.contains_key(name.as_str()),
        }
    }
}

/// One script step: a GET against `url` plus its checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStep {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub checks: Vec<Check>,
}

/// The whole iteration script of one VU. Immutable once a run begins.
#[derive(Debug, Clone)]
pub struct Script {
    pub steps: Vec<ScriptStep>,
    pub think_time: Duration,
}

impl Script {
    pub fn new(steps: Vec<ScriptStep>, think_time: Duration) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::Config("script has no steps".to_string()));
        }
        for step in &steps {
            step.url
                .parse::<Uri>()
                .map_err(|e| Error::Config(format!("invalid url '{}': {}", step.url, e)))?;
        }
        Ok(Self { steps, think_time })
    }

    /// The storefront shape: fetch user details, then the product feed, with
    /// status checks and a one-second pause between iterations.
    pub fn storefront(user_url: &str, products_url: &str) -> Result<Self> {
        Self::new(
            vec![
                ScriptStep {
                    name: "user details".to_string(),
                    url: user_url.to_string(),
                    checks: vec![Check::Status(200)],
                },
                ScriptStep {
                    name: "products".to_string(),
                    url: products_url.to_string(),
                    checks: vec![Check::Status(200)],
                },
            ],
            Duration::from_secs(1),
        )
    }

    /// The hello shape: one GET with a status check and an exact-body check,
    /// repeated without pause.
    pub fn hello(url: &str, expected_body: &str) -> Result<Self> {
        Self::new(
            vec![ScriptStep {
                name: "hello".to_string(),
                url: url.to_string(),
                checks: vec![Check::Status(200), Check::Body(expected_body.to_string())],
            }],
            Duration::ZERO,
        )
    }
}

/// What a VU does, once per iteration. The scheduler only knows this seam.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    async fn iterate(&self, vu_id: u64);
}

/// Executes one script iteration and feeds every outcome to the aggregator.
pub struct ScriptRunner {
    steps: Vec<(ScriptStep, Uri)>,
    think_time: Duration,
    request_timeout: Duration,
    client: HttpClient,
    sink: Arc<ShardedAggregator>,
}

impl ScriptRunner {
    pub fn new(
        script: Script,
        client: HttpClient,
        sink: Arc<ShardedAggregator>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let steps = script
            .steps
            .into_iter()
            .map(|step| {
                let uri = step
                    .url
                    .parse::<Uri>()
                    .map_err(|e| Error::Config(format!("invalid url '{}': {}", step.url, e)))?;
                Ok((step, uri))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            steps,
            think_time: script.think_time,
            request_timeout,
            client,
            sink,
        })
    }
}

#[async_trait]
impl Workload for ScriptRunner {
    /// Steps run strictly in order; a failed step never skips the rest.
    async fn iterate(&self, vu_id: u64) {
        for (step, uri) in &self.steps {
            let outcome = match self.client.get(uri, self.request_timeout).await {
                Ok(response) => {
                    let mut checks_passed = true;
                    for check in &step.checks {
                        let passed = check.passes(&response);
                        checks_passed &= passed;
                        self.sink.record(
                            vu_id,
                            Sample::Check {
                                name: check.label(&step.name),
                                passed,
                            },
                        );
                    }
                    RequestOutcome {
                        step: step.name.clone(),
                        url: step.url.clone(),
                        status: response.status,
                        duration: response.duration,
                        checks_passed,
                        failed: !checks_passed,
                        error: None,
                        timestamp: SystemTime::now(),
                    }
                }
                Err(err) => RequestOutcome {
                    step: step.name.clone(),
                    url: step.url.clone(),
                    status: 0,
                    duration: err.duration,
                    checks_passed: false,
                    failed: true,
                    error: Some(err.message),
                    timestamp: SystemTime::now(),
                },
            };
            self.sink.record(vu_id, Sample::Request(outcome));
        }

        if !self.think_time.is_zero() {
            tokio::time::sleep(self.think_time).await;
        }
    }
}
