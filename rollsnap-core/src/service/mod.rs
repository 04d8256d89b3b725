/*!
Snapshot service abstraction (port) and its adapters.

The rotation engine only talks to the block-storage control plane through
[`SnapshotService`], so the retention logic is independent of the provider and
can be exercised against in-memory doubles.
*/

#[cfg(feature = "ec2")]
pub mod ec2;

use crate::record::SnapshotRecord;
use crate::Result;

/// Control-plane operations on volume snapshots
///
/// Implementations are expected to bound their own wait time and surface a
/// failure when it is exceeded; the engine never retries these calls.
#[cfg_attr(test, mockall::automock)]
pub trait SnapshotService {
    /// List snapshots of `volume_id` carrying `description`
    ///
    /// Implementations may return a superset; the caller filters for an exact
    /// (volume, description) match.
    fn describe_snapshots(&self, volume_id: &str, description: &str) -> Result<Vec<SnapshotRecord>>;

    /// Start a snapshot of `volume_id` tagged with `description`
    ///
    /// # Returns
    /// The new snapshot as reported by the service, in whatever lifecycle state
    /// the service returned
    fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<SnapshotRecord>;

    /// Delete a snapshot
    ///
    /// # Returns
    /// The snapshot id the service acknowledged deleting
    fn delete_snapshot(&self, snapshot_id: &str) -> Result<String>;
}

// Re-export types for convenience
#[cfg(feature = "ec2")]
pub use ec2::Ec2SnapshotService;

/// Memory-based snapshot service for testing
///
/// Keeps snapshots in a Vec and counts mutating calls.
#[cfg(test)]
pub struct MemorySnapshotService {
    snapshots: std::sync::Mutex<Vec<SnapshotRecord>>,
    created_on: chrono::DateTime<chrono::Utc>,
    create_calls: std::sync::atomic::AtomicUsize,
    delete_calls: std::sync::atomic::AtomicUsize,
    next_id: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MemorySnapshotService {
    /// New snapshots are stamped with `created_on`
    pub fn new(created_on: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            snapshots: std::sync::Mutex::new(Vec::new()),
            created_on,
            create_calls: Default::default(),
            delete_calls: Default::default(),
            next_id: std::sync::atomic::AtomicUsize::new(1),
        }
    }

    pub fn with_snapshots(self, snapshots: Vec<SnapshotRecord>) -> Self {
        *self.snapshots.lock().unwrap() = snapshots;
        self
    }

    pub fn snapshot_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.snapshot_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl SnapshotService for MemorySnapshotService {
    fn describe_snapshots(&self, volume_id: &str, _description: &str) -> Result<Vec<SnapshotRecord>> {
        // Filters on volume only, like a server-side filter that is looser than exact match
        let snapshots = self.snapshots.lock().unwrap();
        Ok(snapshots
            .iter()
            .filter(|s| s.volume_id == volume_id)
            .cloned()
            .collect())
    }

    fn create_snapshot(&self, volume_id: &str, description: &str) -> Result<SnapshotRecord> {
        use std::sync::atomic::Ordering;

        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = SnapshotRecord::new(
            format!("snap-new{id:04}"),
            volume_id,
            description,
            crate::record::SnapshotState::Pending,
            self.created_on,
        );
        self.snapshots.lock().unwrap().push(record.clone());
        Ok(record)
    }

    fn delete_snapshot(&self, snapshot_id: &str) -> Result<String> {
        self.delete_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut snapshots = self.snapshots.lock().unwrap();
        let before = snapshots.len();
        snapshots.retain(|s| s.snapshot_id != snapshot_id);
        if snapshots.len() == before {
            return Err(crate::RotateError::service(format!(
                "InvalidSnapshot.NotFound: {snapshot_id}"
            )));
        }
        Ok(snapshot_id.to_string())
    }
}
