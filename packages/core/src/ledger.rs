//! Per-profile daily usage ledger.
//!
//! A [`Subscription`] pairs a bearer token with a counter of requests issued
//! on the current calendar day. When the date advances, the previous day's
//! count is moved into `history`. All date decisions go through a [`Clock`]
//! so the rollover logic can be driven from tests.
//!
//! Not safe for concurrent writers on the same path: callers serialize
//! load/record/save cycles for a given profile.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// File name of the ledger inside a profile directory.
pub const LEDGER_FILE_NAME: &str = "koios.subscription";

/// Source of "today" for rollover decisions.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall clock, normalised to the UTC calendar date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Clock pinned to a single date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Request count for one past day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: NaiveDate,
    pub requests: u64,
}

/// Persisted ledger record for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub credential_token: String,
    pub requests_today: u64,
    /// `None` until the ledger has been rolled over for the first time.
    pub last_reset_date: Option<NaiveDate>,
    /// Ascending by date, at most one entry per date.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Subscription {
    pub fn new(credential_token: impl Into<String>) -> Self {
        Self {
            credential_token: credential_token.into(),
            requests_today: 0,
            last_reset_date: None,
            history: Vec::new(),
        }
    }
}

/// Load, mutate and persist [`Subscription`] records against a [`Clock`].
#[derive(Clone)]
pub struct UsageLedger {
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageLedger")
            .field("today", &self.current_date())
            .finish()
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl UsageLedger {
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
        }
    }

    pub fn current_date(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Move the counter into history if the date has advanced since the last reset.
    ///
    /// Returns `true` when a rollover happened.
    pub fn roll_over(&self, record: &mut Subscription) -> bool {
        let today = self.current_date();
        if record.last_reset_date == Some(today) {
            return false;
        }

        if let Some(previous) = record.last_reset_date {
            match record.history.iter_mut().find(|entry| entry.date == previous) {
                Some(entry) => entry.requests += record.requests_today,
                None => record.history.push(HistoryEntry {
                    date: previous,
                    requests: record.requests_today,
                }),
            }
            record.history.sort_by_key(|entry| entry.date);
            tracing::debug!(
                "Usage ledger rolled over from {} ({} requests) to {}",
                previous,
                record.requests_today,
                today
            );
        }

        record.requests_today = 0;
        record.last_reset_date = Some(today);
        true
    }

    /// Count one request against today, rolling the date over first.
    pub fn record_request(&self, mut record: Subscription) -> Subscription {
        self.roll_over(&mut record);
        record.requests_today += 1;
        record
    }

    /// Read a ledger from disk and bring it up to the current date.
    pub fn load(&self, path: &Path) -> Result<Subscription, CoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CoreError::ProfileNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(err) => return Err(CoreError::io(path, err)),
        };

        let mut record: Subscription = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::corrupt_ledger(path, e.to_string()))?;
        self.roll_over(&mut record);
        Ok(record)
    }

    /// Roll the record over, then write it atomically with owner-only permissions.
    ///
    /// The record is written to a sibling temp file and renamed into place, so
    /// a failed save never leaves a half-written ledger behind.
    pub fn save(&self, record: &mut Subscription, path: &Path) -> Result<(), CoreError> {
        self.roll_over(record);

        let persist_err = |source: std::io::Error| CoreError::UsageLedgerPersistFailure {
            path: path.to_path_buf(),
            source,
        };

        let content = serde_json::to_vec_pretty(record)
            .map_err(|e| persist_err(std::io::Error::new(ErrorKind::InvalidData, e)))?;

        let temp_path = temp_path_for(path);
        let written = write_owner_only(&temp_path, &content)
            .and_then(|()| fs::rename(&temp_path, path));

        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(persist_err(err));
        }
        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| LEDGER_FILE_NAME.into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_owner_only(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}
