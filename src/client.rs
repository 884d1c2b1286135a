//! Solo mining client
//!
//! `SoloClient` is the connection state machine between a full node and the
//! attached mining backends. It is sans-IO: requests go out through the
//! injected [`Fetch`] capability, scheduling goes through [`Timer`], and the
//! caller re-enters the client with `on_fetch_complete`, `on_timer`,
//! `submit`, `connect` and `disconnect`. See `runtime` for the tokio driver.

use crate::block::{BlockBuilder, BlockTemplate};
use crate::coin::Payee;
use crate::config::ClientConfig;
use crate::job::{Job, JobManager};
use crate::metrics::{MetricsSink, TracingMetrics};
use crate::rpc::{self, Fetch, FetchResponse, RpcClient, RpcReply};
use crate::{
    compare_target, BackendId, ConnectionState, Error, JobResult, Result, ShareStatus,
    SubmitRejection, SubmitResult,
};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Scheduling capability.
///
/// Starting the timer replaces whatever was scheduled before.
pub trait Timer: Send {
    fn start(&mut self, delay: Duration, repeat: bool);
    fn stop(&mut self);
}

/// Receives job and connection events for the mining backends
pub trait JobListener: Send {
    fn on_job_received(&mut self, job: &Job);
    fn on_result(&mut self, result: &SubmitResult, status: ShareStatus);
    fn on_login_success(&mut self);
    /// Connection lost; `failures` counts consecutive failures
    fn on_close(&mut self, failures: u32);
}

/// A `submitblock` call awaiting its reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub seq: u64,
    pub diff: u64,
    pub actual_diff: u64,
    pub backend: BackendId,
    pub dev_round: bool,
    pub sent: Instant,
}

pub struct SoloClient {
    config: ClientConfig,
    rpc: RpcClient,
    jobs: JobManager,
    state: ConnectionState,
    failures: Option<u32>,
    pending_template: Option<u64>,
    submissions: HashMap<u64, Submission>,
    diagnostics: HashSet<u64>,
    fetch: Box<dyn Fetch>,
    timer: Box<dyn Timer>,
    listener: Box<dyn JobListener>,
    metrics: Arc<dyn MetricsSink>,
}

impl SoloClient {
    /// Create an unconnected client.
    ///
    /// Fails when the mining or dev address cannot be resolved.
    pub fn new(
        config: ClientConfig,
        fetch: Box<dyn Fetch>,
        timer: Box<dyn Timer>,
        listener: Box<dyn JobListener>,
    ) -> Result<Self> {
        let jobs = Self::job_manager(&config)?;
        let rpc = RpcClient::new(config.endpoint.clone(), config.credentials.as_ref());

        Ok(Self {
            config,
            rpc,
            jobs,
            state: ConnectionState::Unconnected,
            failures: None,
            pending_template: None,
            submissions: HashMap::new(),
            diagnostics: HashSet::new(),
            fetch,
            timer,
            listener,
            metrics: Arc::new(TracingMetrics),
        })
    }

    /// Route reward metrics to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    fn job_manager(config: &ClientConfig) -> Result<JobManager> {
        let payee = Payee::resolve(&config.address, config.coin)?;
        let algorithm = config
            .algorithm
            .clone()
            .unwrap_or_else(|| payee.coin.default_algorithm());

        let mut builder = BlockBuilder::new(payee).with_dev_fee_percent(config.dev_fee_percent);
        if let Some(seed) = config.seed {
            builder = builder.with_seed(seed);
        }

        Ok(JobManager::new(builder, algorithm, config.job_timeout))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures; `None` while unconnected
    pub fn failures(&self) -> Option<u32> {
        self.failures
    }

    pub fn current_job(&self) -> Option<&Job> {
        self.jobs.current()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Submissions still waiting for a node reply
    pub fn pending_submissions(&self) -> usize {
        self.submissions.len()
    }

    /// Start talking to the node. No-op unless unconnected.
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint))]
    pub fn connect(&mut self) {
        if self.state != ConnectionState::Unconnected {
            debug!("Already {}, ignoring connect", self.state);
            return;
        }

        info!("Connecting to node at {}", self.config.endpoint);
        self.state = ConnectionState::Connecting;
        self.failures = Some(0);
        self.request_template();
    }

    /// Stop the timer and forget everything in flight
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Unconnected {
            return;
        }

        info!("Disconnecting from {}", self.config.endpoint);
        self.timer.stop();
        self.state = ConnectionState::Unconnected;
        self.failures = None;
        self.pending_template = None;
        self.submissions.clear();
        self.diagnostics.clear();
        self.jobs.clear();
    }

    /// Replace the configuration wholesale.
    ///
    /// Disconnects first; the caller connects again when ready. On error
    /// the previous configuration stays in place.
    pub fn reconfigure(&mut self, config: ClientConfig) -> Result<()> {
        let jobs = Self::job_manager(&config)?.with_sequence(self.jobs.sequence());

        self.disconnect();
        self.rpc
            .reconfigure(config.endpoint.clone(), config.credentials.as_ref());
        self.jobs = jobs;
        self.config = config;
        info!("Reconfigured for {}", self.config.endpoint);
        Ok(())
    }

    /// Timer tick
    pub fn on_timer(&mut self) {
        match self.state {
            ConnectionState::Unconnected => {}
            ConnectionState::Connecting => {
                if self.pending_template.is_none() {
                    debug!("Retrying getblocktemplate");
                    self.request_template();
                }
            }
            ConnectionState::Connected => {
                if self.jobs.is_expired() && self.pending_template.is_none() {
                    debug!("Job outdated, refreshing template");
                    self.request_template();
                }
            }
        }
    }

    /// Completion of the request with correlation id `id`
    pub fn on_fetch_complete(&mut self, id: u64, result: Result<FetchResponse>) {
        if self.state == ConnectionState::Unconnected {
            debug!("Ignoring response {} while unconnected", id);
            return;
        }

        if self.pending_template == Some(id) {
            self.pending_template = None;
            self.handle_template(result);
        } else if let Some(submission) = self.submissions.remove(&id) {
            self.handle_submission(submission, result);
        } else if self.diagnostics.remove(&id) {
            Self::handle_diagnostic(id, result);
        } else {
            debug!("Ignoring response with unknown id {}", id);
        }
    }

    /// Validate a backend result and forward it to the node.
    ///
    /// Returns the `submitblock` sequence id. Results for superseded jobs
    /// and results above the block target never reach the node.
    #[instrument(skip(self, result), fields(job = %result.job_id, nonce = %result.nonce))]
    pub fn submit(&mut self, result: JobResult) -> std::result::Result<u64, SubmitRejection> {
        let job = match self.jobs.current() {
            Some(job) if job.id == result.job_id => job,
            _ => {
                debug!("Result for stale job {}", result.job_id);
                return Err(SubmitRejection::NotCurrent);
            }
        };
        let dev_round = job.is_dev_round();

        if compare_target(&result.result, job.target().as_bytes()) == Ordering::Greater {
            debug!("Result for job {} is above the block target", result.job_id);
            if !dev_round {
                let partial = SubmitResult {
                    seq: 0,
                    diff: result.diff,
                    actual_diff: result.actual_diff,
                    backend: result.backend,
                    elapsed: Duration::ZERO,
                };
                self.listener.on_result(&partial, ShareStatus::Partial);
            }
            return Err(SubmitRejection::Partial);
        }

        let block_hex = job.candidate().block_hex(result.nonce);
        let request = self.rpc.submit_block(block_hex);
        let seq = request.id;

        info!(
            "Submitting block at height {} from backend {} (seq {})",
            job.height(),
            result.backend,
            seq
        );

        self.submissions.insert(
            seq,
            Submission {
                seq,
                diff: result.diff,
                actual_diff: result.actual_diff,
                backend: result.backend,
                dev_round,
                sent: Instant::now(),
            },
        );
        self.fetch.fetch(request);
        Ok(seq)
    }

    /// Ask the node to mine `nblocks` to the mining address (regtest only)
    pub fn generate(&mut self, nblocks: u32) -> Result<u64> {
        if self.state == ConnectionState::Unconnected {
            return Err(Error::invalid_state("generate while unconnected"));
        }

        let request = self
            .rpc
            .generate_to_address(nblocks, &self.config.address.mining);
        let id = request.id;
        self.diagnostics.insert(id);
        self.fetch.fetch(request);
        Ok(id)
    }

    fn request_template(&mut self) {
        let request = self.rpc.get_block_template();
        self.pending_template = Some(request.id);
        self.fetch.fetch(request);
    }

    fn parse_template(&mut self, result: Result<FetchResponse>) -> Result<bool> {
        let response = result?;
        let value = rpc::parse_reply(&response)?.into_result()?;
        let template = BlockTemplate::from_value(value)?;
        self.jobs.accept_template(&template)
    }

    fn handle_template(&mut self, result: Result<FetchResponse>) {
        let new_job = match self.parse_template(result) {
            Ok(new_job) => new_job,
            Err(e) => {
                warn!("getblocktemplate failed ({}): {}", e.category(), e);
                self.retry();
                return;
            }
        };

        if self.state != ConnectionState::Connected {
            info!("Connected to {}", self.config.endpoint);
            self.state = ConnectionState::Connected;
            self.failures = Some(0);
            self.listener.on_login_success();
            self.timer.start(self.config.poll_interval, true);
        }

        if new_job {
            if let Some(job) = self.jobs.current() {
                let reward = &job.candidate().reward;
                self.metrics.record_reward(reward.coin, reward.value);
                self.listener.on_job_received(job);
            }
        }
    }

    fn handle_submission(&mut self, submission: Submission, result: Result<FetchResponse>) {
        let outcome = result.and_then(|response| rpc::parse_reply(&response));
        let (status, transport_failed) = match outcome {
            Ok(reply) => match reply.into_result() {
                Ok(value) => (rpc::submit_outcome(&value), false),
                Err(e) => (ShareStatus::Rejected(e.to_string()), false),
            },
            Err(e) => {
                let retry = e.is_retryable();
                (ShareStatus::Rejected(e.to_string()), retry)
            }
        };

        let result = SubmitResult {
            seq: submission.seq,
            diff: submission.diff,
            actual_diff: submission.actual_diff,
            backend: submission.backend,
            elapsed: submission.sent.elapsed(),
        };

        match status.error() {
            None => info!("Block {} accepted ({:?})", result.seq, result.elapsed),
            Some(reason) => warn!("Block {} rejected: {}", result.seq, reason),
        }

        if submission.dev_round {
            debug!("Dev round submission {} resolved", result.seq);
        } else {
            self.listener.on_result(&result, status);
        }

        if transport_failed {
            self.retry();
        } else if self.pending_template.is_none() {
            self.request_template();
        }
    }

    fn handle_diagnostic(id: u64, result: Result<FetchResponse>) {
        let outcome = result
            .and_then(|response| rpc::parse_reply(&response))
            .and_then(RpcReply::into_result);
        match outcome {
            Ok(value) => info!("Diagnostic request {} returned {}", id, value),
            Err(e) => warn!("Diagnostic request {} failed: {}", id, e),
        }
    }

    fn retry(&mut self) {
        let Some(failures) = self.failures.as_mut() else {
            return;
        };
        *failures += 1;
        let failures = *failures;

        if self.state == ConnectionState::Connected {
            warn!("Lost connection to {}", self.config.endpoint);
        }
        self.listener.on_close(failures);

        info!(
            "Retrying in {:?} ({} consecutive failures)",
            self.config.retry_pause, failures
        );
        self.state = ConnectionState::Connecting;
        self.timer.start(self.config.retry_pause, false);
    }
}
