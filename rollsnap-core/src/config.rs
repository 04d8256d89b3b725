//! Configuration for a rotation run and for the EC2 snapshot service
//!
//! A `RotationConfig` is handed explicitly to every rotation step, so a dry
//! run is a property of one invocation and never of the process.

use crate::retention::RetentionPolicy;
use crate::{Result, RotateError};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default bound on a single EC2 API operation, in seconds
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 60;

/// Default number of attempts for EC2 calls that failed without effect
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Connection settings for the EC2 snapshot service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ec2Config {
    /// AWS region (optional, defaults to environment)
    pub region: Option<String>,
    /// Named profile from the shared AWS config files
    pub profile: Option<String>,
    /// Endpoint override, e.g. for a local EC2 emulator
    pub endpoint_url: Option<String>,
    /// Upper bound on each API operation, including SDK-level retries
    pub operation_timeout_secs: u64,
    pub max_attempts: usize,
}

impl Default for Ec2Config {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            endpoint_url: None,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Ec2Config {
    /// Create a configuration pinned to a region
    pub fn with_region<S: Into<String>>(region: S) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_secs == 0 {
            return Err(RotateError::configuration(
                "EC2 operation timeout must be at least one second",
            ));
        }
        if self.max_attempts == 0 {
            return Err(RotateError::configuration(
                "EC2 max_attempts must be at least 1",
            ));
        }
        if matches!(&self.region, Some(region) if region.trim().is_empty()) {
            return Err(RotateError::configuration("EC2 region must not be empty"));
        }
        Ok(())
    }
}

/// Everything one rotation of one snapshot series needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Volume to snapshot (e.g. `vol-06f30e77`)
    pub volume_id: String,
    /// Series key shared by all snapshots rotated together
    pub description: String,
    /// Cap on snapshots kept in the series
    pub max_snapshots: u32,
    #[serde(default)]
    pub daily: Option<u32>,
    #[serde(default)]
    pub weekly: Option<u32>,
    #[serde(default)]
    pub monthly: Option<u32>,
    /// Filesystem to freeze for writes while the snapshot is started
    #[serde(default)]
    pub freeze_dir: Option<PathBuf>,
    /// Log every decision but issue no create or delete calls
    #[serde(default)]
    pub dry_run: bool,
    /// Date to rotate as of (UTC); defaults to the current UTC date
    #[serde(default)]
    pub today: Option<NaiveDate>,
    #[serde(default)]
    pub ec2: Ec2Config,
}

impl RotationConfig {
    pub fn new<S1, S2>(volume_id: S1, description: S2, max_snapshots: u32) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            volume_id: volume_id.into(),
            description: description.into(),
            max_snapshots,
            daily: None,
            weekly: None,
            monthly: None,
            freeze_dir: None,
            dry_run: false,
            today: None,
            ec2: Ec2Config::default(),
        }
    }

    pub fn with_daily(mut self, daily: u32) -> Self {
        self.daily = Some(daily);
        self
    }

    pub fn with_weekly(mut self, weekly: u32) -> Self {
        self.weekly = Some(weekly);
        self
    }

    pub fn with_monthly(mut self, monthly: u32) -> Self {
        self.monthly = Some(monthly);
        self
    }

    pub fn with_freeze_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.freeze_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_ec2(mut self, ec2: Ec2Config) -> Self {
        self.ec2 = ec2;
        self
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RotateError::configuration(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        let config: RotationConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Retention policy for this run, applying the default tier split
    pub fn retention_policy(&self) -> Result<RetentionPolicy> {
        RetentionPolicy::from_max(self.max_snapshots, self.daily, self.weekly, self.monthly)
    }

    /// The date this run rotates as of
    pub fn effective_today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.volume_id.trim().is_empty() {
            return Err(RotateError::configuration("volume id must not be empty"));
        }
        if self.description.is_empty() {
            return Err(RotateError::configuration(
                "description must not be empty; it identifies the snapshot series",
            ));
        }
        if let Some(dir) = &self.freeze_dir {
            if dir.as_os_str().is_empty() {
                return Err(RotateError::configuration("freeze_dir must not be empty"));
            }
        }
        self.ec2.validate()?;
        self.retention_policy()?;
        Ok(())
    }
}
