//! Job lifecycle management
//!
//! Tracks the single active job, decides when it is outdated and mints a
//! new job id whenever a template supersedes it.

use crate::block::{BlockBuilder, BlockCandidate, BlockTemplate};
use crate::{Algorithm, JobId, Result, Target};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// A versioned handle over one block candidate
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub algorithm: Algorithm,
    pub created: Instant,
    candidate: BlockCandidate,
}

impl Job {
    pub fn height(&self) -> u64 {
        self.candidate.height
    }

    /// Header bytes the backend hashes
    pub fn blob(&self) -> &[u8] {
        self.candidate.hashing_blob()
    }

    pub fn blob_hex(&self) -> String {
        self.candidate.hashing_blob_hex()
    }

    /// Share threshold, little-endian hex
    pub fn partial_target(&self) -> &str {
        &self.candidate.partial_target
    }

    /// Block target results are checked against before submission
    pub fn target(&self) -> &Target {
        &self.candidate.target
    }

    pub fn is_dev_round(&self) -> bool {
        self.candidate.dev_round
    }

    pub fn candidate(&self) -> &BlockCandidate {
        &self.candidate
    }
}

/// Owns the current job and the builder that produces new ones
#[derive(Debug)]
pub struct JobManager {
    builder: BlockBuilder,
    algorithm: Algorithm,
    job_timeout: Duration,
    job: Option<Job>,
    height: u64,
    prev_hash: String,
    last_refresh: Option<Instant>,
    sequence: u64,
}

impl JobManager {
    pub fn new(builder: BlockBuilder, algorithm: Algorithm, job_timeout: Duration) -> Self {
        Self {
            builder,
            algorithm,
            job_timeout,
            job: None,
            height: 0,
            prev_hash: String::new(),
            last_refresh: None,
            sequence: 0,
        }
    }

    /// Continue the job id sequence of a previous manager
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Number of jobs minted so far
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn current(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    /// Drop the current job; ids keep counting up
    pub fn clear(&mut self) {
        self.job = None;
        self.height = 0;
        self.prev_hash.clear();
        self.last_refresh = None;
    }

    /// The tip moved, or the job has been held longer than the timeout
    pub fn is_outdated(&self, height: u64, prev_hash: &str) -> bool {
        let expired = match self.last_refresh {
            Some(at) => at.elapsed() > self.job_timeout,
            None => true,
        };

        self.job.is_none() || self.height != height || self.prev_hash != prev_hash || expired
    }

    /// Outdated against the tip we already know, i.e. timed out
    pub fn is_expired(&self) -> bool {
        self.is_outdated(self.height, &self.prev_hash)
    }

    /// Feed a fresh template.
    ///
    /// Returns `true` when a new job replaced the current one. A template on
    /// the current previous block keeps the job, its id and its dev-round
    /// draw, and restarts the timeout. A failed build leaves the current job
    /// in place.
    pub fn accept_template(&mut self, template: &BlockTemplate) -> Result<bool> {
        let height = template.height()?;
        let prev_hash = template.previous_block_hash()?;

        if self.job.is_some() && self.prev_hash == prev_hash {
            debug!("Template for height {} unchanged, keeping job", height);
            self.last_refresh = Some(Instant::now());
            return Ok(false);
        }

        let candidate = self.builder.build(template)?;

        self.sequence += 1;
        let job = Job {
            id: JobId::from_sequence(self.sequence),
            algorithm: self.algorithm.clone(),
            created: Instant::now(),
            candidate,
        };

        info!(
            "New job {} at height {} (algo {}, target {})",
            job.id,
            height,
            job.algorithm,
            job.target()
        );

        self.height = height;
        self.prev_hash = prev_hash.to_string();
        self.last_refresh = Some(job.created);
        self.job = Some(job);
        Ok(true)
    }
}
