//! Batch geocoding engines
//!
//! - [`job_poll`]: submit a delimited job, poll its status, fetch result and
//!   error streams and correlate them by record index
//! - [`redirect_chase`]: submit a JSON batch and follow "not ready yet"
//!   redirects until the result is available
//! - [`fallback`]: concurrent single-item calls for providers without a
//!   batch endpoint

pub mod fallback;
pub mod job_poll;
pub mod pacing;
pub mod redirect_chase;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use fallback::geocode_concurrently;
pub use job_poll::{JobPollBatchEngine, JobPollEndpoints, JobStatus};
pub use pacing::{Pacer, PollPacing};
pub use redirect_chase::{
    BatchItemCodec, BatchItemResponse, ChaseStep, RedirectChaseBatchEngine, RedirectChaseEndpoints,
};

use crate::error::{Error, Result};

/// Attempt budget for the job-poll protocol
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 500;

/// Hop budget for the redirect-chase protocol
pub const DEFAULT_MAX_REDIRECT_HOPS: u32 = 84;

/// Server-side wait hint sent with redirect-chase submissions
pub const DEFAULT_WAIT_TIME_SECONDS: u32 = 10;

/// Budgets and pacing shared by the batch engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Status polls before a job-poll batch times out
    pub max_poll_attempts: u32,
    /// Redirects followed before a redirect-chase batch times out
    pub max_redirect_hops: u32,
    /// Wait hint, in seconds, for the redirect-chase submit call
    pub wait_time_seconds: u32,
    /// Delay policy between status polls
    pub poll_pacing: PollPacing,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_redirect_hops: DEFAULT_MAX_REDIRECT_HOPS,
            wait_time_seconds: DEFAULT_WAIT_TIME_SECONDS,
            poll_pacing: PollPacing::Immediate,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_poll_attempts == 0 {
            return Err(Error::config("batch max_poll_attempts must be at least 1"));
        }
        if self.max_redirect_hops == 0 {
            return Err(Error::config("batch max_redirect_hops must be at least 1"));
        }
        Ok(())
    }
}

/// Fail with [`Error::Cancelled`] if the caller tripped the token
pub(crate) fn check_cancelled(token: Option<&CancellationToken>, stage: &str) -> Result<()> {
    match token {
        Some(token) if token.is_cancelled() => Err(Error::Cancelled {
            message: format!("cancelled before {}", stage),
        }),
        _ => Ok(()),
    }
}
