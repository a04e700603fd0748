//! Job-poll batch protocol
//!
//! 1. POST a pipe-delimited payload (one 1-based record per line) to the
//!    jobs endpoint and read the job id from the response.
//! 2. GET `<jobs>/<id>?action=status` until the status is `completed`, up
//!    to the configured attempt budget.
//! 3. GET `<jobs>/<id>/result` and `<jobs>/<id>/errors` and correlate both
//!    line streams back to query indexes.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::BatchGeocode;
use crate::batch::{check_cancelled, BatchConfig};
use crate::error::{Error, Result};
use crate::http::{params, Params, PostBody, Transport, TransportResponse};
use crate::types::{BatchEntry, BatchOutcome, Query, RemoteJob, ResultItem};

/// Public HERE batch jobs endpoint
pub const DEFAULT_JOBS_URL: &str = "https://batch.geocoder.ls.hereapi.com/6.2/jobs";

/// Output columns requested from the service, after `recId|seqNumber|seqLength`
pub const OUTPUT_COLUMNS: [&str; 11] = [
    "displayLatitude",
    "displayLongitude",
    "locationLabel",
    "houseNumber",
    "street",
    "district",
    "city",
    "postalCode",
    "county",
    "state",
    "country",
];

/// Delimiter used for both input and output records
const DELIMITER: char = '|';

/// Error lines count the header line and are 1-based
const ERROR_LINE_OFFSET: usize = 2;

fn error_line_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^Line Number:\s*(\d+)\s+(.*)$"))
        .as_ref()
        .map_err(|e| Error::Internal {
            message: "invalid error line pattern".to_string(),
            source: anyhow::Error::new(e.clone()),
        })
}

/// Endpoint locations for the job-poll protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPollEndpoints {
    pub jobs_url: String,
}

impl Default for JobPollEndpoints {
    fn default() -> Self {
        Self {
            jobs_url: DEFAULT_JOBS_URL.to_string(),
        }
    }
}

impl JobPollEndpoints {
    fn job(&self, id: &str) -> String {
        format!("{}/{}", self.jobs_url.trim_end_matches('/'), id)
    }

    fn results(&self, id: &str) -> String {
        format!("{}/result", self.job(id))
    }

    fn errors(&self, id: &str) -> String {
        format!("{}/errors", self.job(id))
    }
}

/// Remote job status as reported by the status resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Accepted,
    Running,
    Completed,
    Failed,
    Cancelled,
    Deleted,
    Other(String),
}

impl JobStatus {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "accepted" | "submitted" => JobStatus::Accepted,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            "deleted" => JobStatus::Deleted,
            other => JobStatus::Other(other.to_string()),
        }
    }

    /// Statuses from which a job can never reach `completed`
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Cancelled | JobStatus::Deleted)
    }
}

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    #[serde(alias = "Response")]
    response: Option<JobResponse>,
    #[serde(rename = "type")]
    error_type: Option<String>,
    subtype: Option<String>,
    details: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    #[serde(rename = "metaInfo", alias = "MetaInfo")]
    meta_info: Option<MetaInfo>,
    #[serde(alias = "Status")]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetaInfo {
    #[serde(rename = "requestId", alias = "RequestId")]
    request_id: String,
}

impl JobEnvelope {
    fn parse(response: &TransportResponse, provider: &str) -> Result<Self> {
        let envelope: Option<JobEnvelope> = serde_json::from_str(&response.body).ok();

        if let Some(envelope) = &envelope {
            if envelope.error_type.as_deref() == Some("ApplicationError") {
                return Err(Error::Provider {
                    provider: provider.to_string(),
                    message: format!(
                        "{}: {}",
                        envelope.subtype.as_deref().unwrap_or("ApplicationError"),
                        envelope.details.as_deref().unwrap_or("no details")
                    ),
                });
            }
        }

        let response = response.clone().error_for_status()?;
        envelope.ok_or_else(|| {
            Error::protocol(format!(
                "unreadable job response: {}",
                truncate(&response.body, 200)
            ))
        })
    }

    fn status(&self) -> Option<JobStatus> {
        self.response
            .as_ref()
            .and_then(|r| r.status.as_deref())
            .map(JobStatus::parse)
    }
}

/// Engine for the job-poll batch protocol
pub struct JobPollBatchEngine {
    provider: String,
    transport: Arc<dyn Transport>,
    endpoints: JobPollEndpoints,
    auth: Params,
    config: BatchConfig,
    cancellation: Option<CancellationToken>,
}

impl std::fmt::Debug for JobPollBatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPollBatchEngine")
            .field("provider", &self.provider)
            .field("endpoints", &self.endpoints)
            .field("config", &self.config)
            .finish()
    }
}

impl JobPollBatchEngine {
    /// Create an engine; `auth` parameters are sent with every request
    pub fn new(
        provider: impl Into<String>,
        transport: Arc<dyn Transport>,
        endpoints: JobPollEndpoints,
        auth: Params,
        config: BatchConfig,
    ) -> Self {
        Self {
            provider: provider.into(),
            transport,
            endpoints,
            auth,
            config,
            cancellation: None,
        }
    }

    /// Stop polling once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn request_params<'a>(&self, extra: impl IntoIterator<Item = (&'a str, &'a str)>) -> Params {
        let mut all = self.auth.clone();
        all.extend(params(extra));
        all
    }

    /// Build the delimited submission payload
    pub fn submission_body(queries: &[Query]) -> String {
        let with_country = queries.iter().any(|q| q.country().is_some());
        let mut lines = Vec::with_capacity(queries.len() + 1);

        lines.push(if with_country {
            "recId|searchText|country".to_string()
        } else {
            "recId|searchText".to_string()
        });

        for (index, query) in queries.iter().enumerate() {
            let text = sanitize_field(&query.text());
            let line = if with_country {
                let country = sanitize_field(query.country().unwrap_or(""));
                format!("{}{d}{}{d}{}", index + 1, text, country, d = DELIMITER)
            } else {
                format!("{}{d}{}", index + 1, text, d = DELIMITER)
            };
            lines.push(line);
        }

        lines.join("\n")
    }

    /// Create the remote job
    pub async fn submit(&self, queries: &[Query]) -> Result<RemoteJob> {
        check_cancelled(self.cancellation.as_ref(), "submit")?;
        let outcols = OUTPUT_COLUMNS.join(",");
        let request_params = self.request_params([
            ("action", "run"),
            ("outdelim", "|"),
            ("indelim", "|"),
            ("header", "false"),
            ("outputcombined", "true"),
            ("outcols", outcols.as_str()),
        ]);
        let body = PostBody::text("text/plain", Self::submission_body(queries));

        let response = self
            .transport
            .post(&self.endpoints.jobs_url, &request_params, body)
            .await?;
        let envelope = JobEnvelope::parse(&response, &self.provider)?;

        let id = envelope
            .response
            .and_then(|r| r.meta_info)
            .map(|m| m.request_id)
            .ok_or_else(|| Error::protocol("job creation response carries no request id"))?;

        let job = RemoteJob::new(id);
        info!(
            provider = %self.provider,
            job_id = %job.id,
            records = queries.len(),
            "batch job submitted"
        );
        Ok(job)
    }

    /// Poll the status resource until the job completes.
    ///
    /// Returns the number of attempts used.
    pub async fn wait_for_completion(&self, job: &RemoteJob) -> Result<u32> {
        let max_attempts = self.config.max_poll_attempts;
        let mut pacer = self.config.poll_pacing.pacer();
        let status_params = self.request_params([("action", "status")]);

        for attempt in 1..=max_attempts {
            check_cancelled(self.cancellation.as_ref(), "status poll")?;
            if attempt > 1 {
                pacer.pause().await;
            }

            let response = self
                .transport
                .get(&self.endpoints.job(&job.id), &status_params)
                .await?;
            let status = JobEnvelope::parse(&response, &self.provider)?.status();
            debug!(job_id = %job.id, attempt, ?status, "job status");

            match status {
                Some(JobStatus::Completed) => {
                    info!(job_id = %job.id, attempts = attempt, "batch job completed");
                    return Ok(attempt);
                }
                Some(status) if status.is_terminal_failure() => {
                    return Err(Error::Provider {
                        provider: self.provider.clone(),
                        message: format!("batch job {} ended with status {:?}", job.id, status),
                    });
                }
                _ => {}
            }
        }

        warn!(job_id = %job.id, attempts = max_attempts, "batch job did not complete");
        Err(Error::Timeout {
            message: format!("batch job {} did not complete", job.id),
            attempts: max_attempts,
        })
    }

    /// Fetch both line streams and correlate them
    pub async fn fetch_outcome(&self, job: &RemoteJob, query_count: usize) -> Result<BatchOutcome> {
        check_cancelled(self.cancellation.as_ref(), "result fetch")?;
        let fetch_params = self.request_params([("outputcompressed", "false")]);

        let results = self
            .transport
            .get(&self.endpoints.results(&job.id), &fetch_params)
            .await?
            .error_for_status()?;
        let errors = self
            .transport
            .get(&self.endpoints.errors(&job.id), &fetch_params)
            .await?
            .error_for_status()?;

        correlate(query_count, &results.body, &errors.body, &self.provider)
    }

    /// Submit, poll and fetch in one call
    pub async fn run(&self, queries: &[Query]) -> Result<BatchOutcome> {
        let job = self.submit(queries).await?;
        self.wait_for_completion(&job).await?;
        self.fetch_outcome(&job, queries.len()).await
    }
}

#[async_trait]
impl BatchGeocode for JobPollBatchEngine {
    async fn batch_geocode(&self, queries: &[Query]) -> Result<BatchOutcome> {
        self.run(queries).await
    }
}

/// Correlate result and error streams to one entry per query.
///
/// An index that appears in neither stream gets empty data and no error.
pub fn correlate(
    query_count: usize,
    results: &str,
    errors: &str,
    provider: &str,
) -> Result<BatchOutcome> {
    let mut outcome: BatchOutcome = vec![BatchEntry::default(); query_count];

    for line in results.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (index, item) = parse_result_line(line, provider)?;
        let entry = outcome.get_mut(index).ok_or_else(|| {
            Error::protocol(format!(
                "result record {} is outside the {} submitted queries",
                index + 1,
                query_count
            ))
        })?;
        entry.data.push(item);
    }

    for line in errors.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (index, message) = parse_error_line(line)?;
        let entry = outcome.get_mut(index).ok_or_else(|| {
            Error::protocol(format!(
                "error line for query {} is outside the {} submitted queries",
                index,
                query_count
            ))
        })?;
        entry.error = Some(message);
    }

    Ok(outcome)
}

/// Parse one result line into its 0-based query index and record
pub fn parse_result_line(line: &str, provider: &str) -> Result<(usize, ResultItem)> {
    let fields: Vec<&str> = line.split(DELIMITER).collect();
    let record_id: usize = fields[0]
        .trim()
        .parse()
        .map_err(|_| {
            Error::protocol(format!("result line has no record id: {}", truncate(line, 80)))
        })?;
    if record_id == 0 {
        return Err(Error::protocol("result record ids are 1-based"));
    }

    let text = |i: usize| {
        fields
            .get(i)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let number = |i: usize| fields.get(i).and_then(|v| v.trim().parse::<f64>().ok());

    let mut item = ResultItem::for_provider(provider);
    item.latitude = number(3);
    item.longitude = number(4);
    item.formatted_address = text(5);
    item.street_number = text(6);
    item.street_name = text(7);
    item.district = text(8);
    item.city = text(9);
    item.zipcode = text(10);
    item.county = text(11);
    item.state = text(12);
    item.country_code = text(13);

    if let Some(seq) = text(1) {
        item.extra.insert("seqNumber".to_string(), seq.into());
    }
    if let Some(len) = text(2) {
        item.extra.insert("seqLength".to_string(), len.into());
    }

    Ok((record_id - 1, item))
}

/// Parse one `Line Number:<n> <message>` error line
pub fn parse_error_line(line: &str) -> Result<(usize, String)> {
    let captures = error_line_pattern()?
        .captures(line)
        .ok_or_else(|| Error::protocol(format!("unparseable error line: {}", truncate(line, 80))))?;

    let line_number: usize = captures[1]
        .parse()
        .map_err(|_| Error::protocol(format!("invalid line number in: {}", line)))?;
    let index = line_number
        .checked_sub(ERROR_LINE_OFFSET)
        .ok_or_else(|| Error::protocol(format!("error line refers to the header: {}", line)))?;

    Ok((index, captures[2].trim().to_string()))
}

fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == DELIMITER || c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}
