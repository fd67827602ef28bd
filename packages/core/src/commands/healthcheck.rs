//! Instance healthcheck.
//!
//! Runs a fixed sequence of tasks against one Koios instance and stops at
//! the first failing task. The tip task runs first because the cache and
//! endpoint tasks measure against it.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::cli::HealthcheckArgs;
use crate::error::AppError;
use crate::host;
use crate::output::{self, OutputOptions};
use crate::request::{compose, Pagination};
use crate::services::koios::{ApiCall, ApiResponse, KoiosClient, KoiosTransport};

/// Request timeout when `--timeout` is not given.
pub const DEFAULT_HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Blocks (or seconds) a cache may trail the tip.
const MAX_CACHE_LAG: i64 = 1000;
/// Slot into the epoch by which the active stake cache must be populated.
const ACTIVE_STAKE_SLOT_TOLERANCE: u64 = 1800;
/// `content-range` of an unfiltered `/blocks` call on a correctly configured instance.
const EXPECTED_CONTENT_RANGE: &str = "0-999/*";
const CONTROL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Endpoints the CLI relies on, which every instance must expose.
const REQUIRED_RPCS: &[&str] = &[
    "/tip",
    "/genesis",
    "/totals",
    "/epoch_info",
    "/epoch_params",
    "/blocks",
    "/block_info",
    "/tx_info",
    "/tx_status",
    "/address_info",
    "/account_info",
    "/pool_list",
    "/pool_info",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    #[serde(rename = "ok")]
    Healthy,
    #[serde(rename = "error")]
    Unhealthy,
}

/// Outcome of a single healthcheck task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub task: String,
    pub status: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TipSummary {
    pub block_no: u64,
    pub epoch_no: u64,
    pub epoch_slot: u64,
    pub block_time: i64,
    pub last_block_age_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub host: String,
    pub status: HealthStatus,
    pub max_age_secs: u64,
    pub tip: Option<TipSummary>,
    pub tasks: Vec<TaskResult>,
}

impl HealthReport {
    fn new(host: &str, max_age: u64) -> Self {
        Self {
            host: host.to_string(),
            status: HealthStatus::Healthy,
            max_age_secs: max_age,
            tip: None,
            tasks: Vec::new(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// The failing task, if any.
    pub fn failure(&self) -> Option<&TaskResult> {
        self.tasks
            .iter()
            .find(|task| task.status == HealthStatus::Unhealthy)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum HealthTask {
    Tip,
    StakeDistributionCache,
    PoolHistoryCache,
    ActiveStakeCache,
    Limit,
    Endpoint(ApiCall),
    Rpcs,
}

impl HealthTask {
    fn name(&self) -> String {
        match self {
            Self::Tip => "check-tip".to_string(),
            Self::StakeDistributionCache => {
                "check-cache-status(eq.stake_distribution_lbh)".to_string()
            }
            Self::PoolHistoryCache => {
                "check-cache-status(eq.pool_history_cache_last_updated)".to_string()
            }
            Self::ActiveStakeCache => {
                "check-cache-status(eq.last_active_stake_validated_epoch)".to_string()
            }
            Self::Limit => "check-limit".to_string(),
            Self::Endpoint(call) => {
                let query: Vec<String> = call
                    .params
                    .iter()
                    .map(|(key, value)| format!("{}={}", key, value))
                    .collect();
                if query.is_empty() {
                    format!("check-endpoint(/{})", call.endpoint)
                } else {
                    format!("check-endpoint(/{}?{})", call.endpoint, query.join("&"))
                }
            }
            Self::Rpcs => "check-rpcs".to_string(),
        }
    }
}

/// Run every healthcheck task in order, stopping at the first failure.
pub async fn check(transport: &dyn KoiosTransport, max_age: u64, now: DateTime<Utc>) -> HealthReport {
    let mut runner = Runner {
        transport,
        now,
        report: HealthReport::new(transport.base_url(), max_age),
    };

    let tasks = [
        HealthTask::Tip,
        HealthTask::StakeDistributionCache,
        HealthTask::PoolHistoryCache,
        HealthTask::ActiveStakeCache,
        HealthTask::Limit,
        HealthTask::Endpoint(ApiCall::get("tx_metalabels")),
        HealthTask::Rpcs,
    ];
    for task in tasks {
        if !runner.step(task).await {
            return runner.report;
        }
    }

    let previous_epoch = runner
        .report
        .tip
        .as_ref()
        .map_or(0, |tip| tip.epoch_no.saturating_sub(1));
    runner
        .step(HealthTask::Endpoint(
            ApiCall::get("epoch_info").param("_epoch_no", previous_epoch),
        ))
        .await;

    runner.report
}

struct Runner<'a> {
    transport: &'a dyn KoiosTransport,
    now: DateTime<Utc>,
    report: HealthReport,
}

impl Runner<'_> {
    /// Run one task and record it. Returns `false` once the check has failed.
    async fn step(&mut self, task: HealthTask) -> bool {
        let outcome = self.run(&task).await;
        tracing::debug!("{}: {:?}", task.name(), outcome);

        let (status, message) = match outcome {
            Ok(message) => (HealthStatus::Healthy, message),
            Err(message) => (HealthStatus::Unhealthy, message),
        };
        self.report.tasks.push(TaskResult {
            task: task.name(),
            status,
            message,
        });

        if status == HealthStatus::Unhealthy {
            self.report.status = HealthStatus::Unhealthy;
            return false;
        }
        true
    }

    async fn run(&mut self, task: &HealthTask) -> Result<String, String> {
        match task {
            HealthTask::Tip => self.check_tip().await,
            HealthTask::StakeDistributionCache => self.check_stake_distribution().await,
            HealthTask::PoolHistoryCache => self.check_pool_history().await,
            HealthTask::ActiveStakeCache => self.check_active_stake().await,
            HealthTask::Limit => self.check_limit().await,
            HealthTask::Endpoint(call) => self.check_endpoint(call).await,
            HealthTask::Rpcs => self.check_rpcs().await,
        }
    }

    async fn fetch(&self, call: &ApiCall, pagination: Pagination) -> Result<ApiResponse, String> {
        let request = compose(&pagination, None, None).map_err(|err| err.to_string())?;
        self.transport
            .execute(call, &request)
            .await
            .map_err(|err| err.to_string())
    }

    fn tip(&self) -> Result<&TipSummary, String> {
        self.report
            .tip
            .as_ref()
            .ok_or_else(|| "tip is unknown".to_string())
    }

    async fn check_tip(&mut self) -> Result<String, String> {
        let response = self.fetch(&ApiCall::get("tip"), Pagination::default()).await?;
        let row = &response.data[0];
        let (Some(block_no), Some(epoch_no), Some(epoch_slot), Some(block_time)) = (
            row["block_no"].as_u64(),
            row["epoch_no"].as_u64(),
            row["epoch_slot"].as_u64(),
            row["block_time"].as_i64(),
        ) else {
            return Err("tip response is missing block_no, epoch_no, epoch_slot or block_time".into());
        };

        let age = self.now.timestamp() - block_time;
        self.report.tip = Some(TipSummary {
            block_no,
            epoch_no,
            epoch_slot,
            block_time,
            last_block_age_secs: age,
        });

        let max_age = self.report.max_age_secs;
        if age > max_age as i64 {
            return Err(format!(
                "tip has expired, block {} is {}s old, more than {}s allowed",
                block_no, age, max_age
            ));
        }
        Ok(format!("tip age {}s", age))
    }

    async fn control_value(&self, key: &str) -> Result<String, String> {
        let call = ApiCall::get("control_table").param("key", format!("eq.{}", key));
        let response = self.fetch(&call, Pagination::default()).await?;

        let rows = response
            .data
            .as_array()
            .ok_or_else(|| "control_table response is not an array".to_string())?;
        if rows.len() != 1 {
            return Err(format!("invalid response length {}", rows.len()));
        }
        rows[0]["last_value"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("{} has no last_value", key))
    }

    async fn check_stake_distribution(&self) -> Result<String, String> {
        let value = self.control_value("stake_distribution_lbh").await?;
        let cached_block: i64 = value
            .trim()
            .parse()
            .map_err(|_| format!("stake_distribution_lbh is not a block number: {}", value))?;

        let diff = self.tip()?.block_no as i64 - cached_block;
        if diff > MAX_CACHE_LAG {
            return Err(format!(
                "Stake Distribution cache too far from tip ({} blocks)",
                diff
            ));
        }
        Ok(format!("block diff {}", diff))
    }

    async fn check_pool_history(&self) -> Result<String, String> {
        let value = self.control_value("pool_history_cache_last_updated").await?;
        let updated = NaiveDateTime::parse_from_str(value.trim(), CONTROL_TIMESTAMP_FORMAT)
            .map_err(|err| format!("invalid pool_history_cache_last_updated {:?}: {}", value, err))?
            .and_utc();

        let diff = self.tip()?.block_time - updated.timestamp();
        if diff > MAX_CACHE_LAG {
            return Err(format!("Pool History cache too far from tip ({}s)", diff));
        }
        Ok(format!("time diff {}s", diff))
    }

    async fn check_active_stake(&self) -> Result<String, String> {
        let value = self.control_value("last_active_stake_validated_epoch").await?;
        let validated: u64 = value
            .trim()
            .parse()
            .map_err(|_| format!("last_active_stake_validated_epoch is not an epoch: {}", value))?;

        let tip = self.tip()?;
        if validated == tip.epoch_no {
            return Ok(format!("active stake validated for epoch {}", validated));
        }
        if tip.epoch_slot >= ACTIVE_STAKE_SLOT_TOLERANCE {
            return Err(format!(
                "Active Stake cache for epoch {} still not populated as of slot {}",
                tip.epoch_no, tip.epoch_slot
            ));
        }
        Ok(format!(
            "active stake for epoch {} pending at slot {}",
            tip.epoch_no, tip.epoch_slot
        ))
    }

    async fn check_limit(&self) -> Result<String, String> {
        let response = self.fetch(&ApiCall::get("blocks"), Pagination::default()).await?;
        match response.header("content-range") {
            Some(EXPECTED_CONTENT_RANGE) => Ok("PostgREST config limit is 999".to_string()),
            other => Err(format!(
                "PostgREST limit does not match monitoring instances, expected {} got {}",
                EXPECTED_CONTENT_RANGE,
                other.unwrap_or("no content-range")
            )),
        }
    }

    async fn check_endpoint(&self, call: &ApiCall) -> Result<String, String> {
        let single_row = Pagination {
            page: Some(std::num::NonZeroU32::MIN),
            page_size: Some(std::num::NonZeroU32::MIN),
        };
        let response = self.fetch(call, single_row).await?;
        match response.data.as_array().map(Vec::len) {
            Some(1) => Ok("got valid response".to_string()),
            Some(count) => Err(format!("wrong result count ({})", count)),
            None => Err("response is not an array".to_string()),
        }
    }

    async fn check_rpcs(&self) -> Result<String, String> {
        // PostgREST serves its OpenAPI document at the API root.
        let response = self.fetch(&ApiCall::get(""), Pagination::default()).await?;
        let Some(paths) = response.data.get("paths").and_then(Value::as_object) else {
            return Err("instance did not return an OpenAPI document".to_string());
        };

        let missing: Vec<&str> = REQUIRED_RPCS
            .iter()
            .copied()
            .filter(|rpc| !paths.contains_key(*rpc))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing endpoints: {}", missing.join(", ")));
        }
        Ok(format!("all {} endpoints exposed", REQUIRED_RPCS.len()))
    }
}

fn request_timeout(args: &HealthcheckArgs) -> Duration {
    args.connection
        .timeout
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_HEALTHCHECK_TIMEOUT)
}

/// One `[  OK  ]` or `[ERROR ]` line per task that ran.
pub fn render_text(report: &HealthReport) -> String {
    report
        .tasks
        .iter()
        .map(|task| {
            let label = match task.status {
                HealthStatus::Healthy => "[  OK  ]",
                HealthStatus::Unhealthy => "[ERROR ]",
            };
            format!("{}: {} - {}", label, task.task, task.message)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn run(args: HealthcheckArgs) -> Result<(), AppError> {
    let host = host::resolve(&args.connection.hosts.selections())?;
    let timeout = request_timeout(&args);
    let client = KoiosClient::new(super::client_options(&args.connection, &host, timeout, None))?;

    let report = check(&client, args.age, Utc::now()).await;
    tracing::debug!("Healthcheck against {}: {:?}", host, report.status);

    if !args.quiet {
        if args.json {
            println!("{}", output::render(&report, OutputOptions::default())?);
        } else {
            println!("{}", render_text(&report));
        }
    }

    match report.failure() {
        None => Ok(()),
        Some(failed) => Err(AppError::Health(format!("{}: {}", failed.task, failed.message))),
    }
}
