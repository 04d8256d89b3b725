/*!
Snapshot records as observed from the snapshot service.
*/

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Id given to the snapshot a dry run pretends to create.
pub const SIMULATED_SNAPSHOT_ID: &str = "snap-TBD";

/// Lifecycle state reported by the snapshot service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotState {
    Pending,
    Completed,
    Error,
    Other(String),
}

impl SnapshotState {
    /// States a freshly created snapshot may be in and still be trusted
    pub fn is_acceptable(&self) -> bool {
        matches!(self, SnapshotState::Pending | SnapshotState::Completed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            SnapshotState::Pending => "pending",
            SnapshotState::Completed => "completed",
            SnapshotState::Error => "error",
            SnapshotState::Other(state) => state,
        }
    }
}

impl From<&str> for SnapshotState {
    fn from(state: &str) -> Self {
        match state {
            "pending" => SnapshotState::Pending,
            "completed" => SnapshotState::Completed,
            "error" => SnapshotState::Error,
            other => SnapshotState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SnapshotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One snapshot of a volume, normalized from the service's representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Service-assigned snapshot id (e.g. `snap-e1cc35a1`)
    pub snapshot_id: String,

    /// Volume the snapshot was taken from
    pub volume_id: String,

    /// Series key; all snapshots sharing it are rotated together
    pub description: String,

    pub state: SnapshotState,

    /// When the snapshot was started, in UTC
    pub started_at: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn new<S1, S2, S3>(
        snapshot_id: S1,
        volume_id: S2,
        description: S3,
        state: SnapshotState,
        started_at: DateTime<Utc>,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            snapshot_id: snapshot_id.into(),
            volume_id: volume_id.into(),
            description: description.into(),
            state,
            started_at,
        }
    }

    /// The record a dry run stands in for the snapshot it did not create
    pub fn simulated(volume_id: &str, description: &str, today: NaiveDate) -> Self {
        Self::new(
            SIMULATED_SNAPSHOT_ID,
            volume_id,
            description,
            SnapshotState::Pending,
            today.and_time(chrono::NaiveTime::default()).and_utc(),
        )
    }

    /// Calendar date (UTC) the retention policy judges this snapshot by
    pub fn creation_date(&self) -> NaiveDate {
        self.started_at.date_naive()
    }

    /// True if this record belongs to the (volume, description) series
    pub fn belongs_to(&self, volume_id: &str, description: &str) -> bool {
        self.volume_id == volume_id && self.description == description
    }

    pub fn is_simulated(&self) -> bool {
        self.snapshot_id == SIMULATED_SNAPSHOT_ID
    }
}
