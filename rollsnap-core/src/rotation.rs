/*!
Snapshot rotation engine.

One run of [`SnapshotRotator::run`] creates today's snapshot of a volume,
enumerates the volume's snapshot series, computes the retained dates and
deletes every snapshot dated outside them. Steps run strictly in sequence and
the first fatal error ends the run.
*/

use crate::config::RotationConfig;
use crate::freeze::{FilesystemControl, FreezeGuard};
use crate::record::SnapshotRecord;
use crate::retention::RetentionPolicy;
use crate::service::SnapshotService;
use crate::{Result, RotateError};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

/// Snapshots split by the retention decision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub kept: Vec<SnapshotRecord>,
    pub deleted: Vec<SnapshotRecord>,
}

impl PruneReport {
    pub fn deleted_ids(&self) -> Vec<&str> {
        self.deleted.iter().map(|s| s.snapshot_id.as_str()).collect()
    }
}

/// Outcome of a full rotation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub today: NaiveDate,
    pub policy: RetentionPolicy,
    /// The snapshot created by this run (a placeholder on dry runs)
    pub created: SnapshotRecord,
    pub retained_dates: BTreeSet<NaiveDate>,
    pub pruned: PruneReport,
    pub dry_run: bool,
}

/// Split `records` into those dated on a retained date and the rest
pub fn partition_by_retention(
    records: Vec<SnapshotRecord>,
    retained: &BTreeSet<NaiveDate>,
) -> PruneReport {
    let (kept, deleted) = records
        .into_iter()
        .partition(|record| retained.contains(&record.creation_date()));
    PruneReport { kept, deleted }
}

/// Engine for rotating one snapshot series at a time
///
/// # Example
/// ```rust,no_run
/// use rollsnap_core::{Ec2SnapshotService, FsFreeze, RotationConfig, SnapshotRotator};
/// use rollsnap_core::config::Ec2Config;
///
/// let service = Ec2SnapshotService::new(&Ec2Config::default())?;
/// let rotator = SnapshotRotator::new(service, FsFreeze::new());
///
/// let config = RotationConfig::new("vol-06f30e77", "db nightly", 10).with_dry_run(true);
/// let report = rotator.run(&config)?;
/// println!("would delete {:?}", report.pruned.deleted_ids());
/// # Ok::<(), rollsnap_core::RotateError>(())
/// ```
pub struct SnapshotRotator<S, F>
where
    S: SnapshotService,
    F: FilesystemControl,
{
    service: S,
    fs: F,
}

impl<S, F> SnapshotRotator<S, F>
where
    S: SnapshotService,
    F: FilesystemControl,
{
    pub fn new(service: S, fs: F) -> Self {
        Self { service, fs }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    /// Create, enumerate, compute retention and prune
    ///
    /// # Errors
    /// * `RotateError::Configuration` - before any remote call, if the policy
    ///   keeps no daily snapshot or the config is otherwise invalid
    /// * `RotateError::FreezeFailed` - the snapshot was not attempted
    /// * `RotateError::CreateFailed` / `UnexpectedState` - nothing was pruned
    /// * `RotateError::Enumeration` - nothing was pruned
    /// * `RotateError::DeletionFailed` - deletions before the failing one stand
    pub fn run(&self, config: &RotationConfig) -> Result<RotationReport> {
        config.validate()?;
        let policy = config.retention_policy()?;
        let today = config.effective_today();
        if !config.dry_run && config.today.is_some() && today != Utc::now().date_naive() {
            warn!(
                %today,
                "Rotating a live series as of a date other than the current UTC date"
            );
        }

        info!(
            volume_id = %config.volume_id,
            description = %config.description,
            daily = policy.daily(),
            weekly = policy.weekly(),
            monthly = policy.monthly(),
            %today,
            dry_run = config.dry_run,
            "Starting snapshot rotation"
        );

        let created = self.create_snapshot(config, today)?;
        let snapshots = self.list_snapshots(config, today)?;

        let retained_dates = policy.retained_dates(today);
        debug!(retained = ?retained_dates, "Computed retained dates");
        #[cfg(feature = "metrics")]
        crate::observability::RotationMetrics::global().record_retained_dates(retained_dates.len());

        let pruned = self.prune_series(
            snapshots,
            &retained_dates,
            config.dry_run,
            Some(created.snapshot_id.as_str()),
        )?;

        info!(
            volume_id = %config.volume_id,
            kept = pruned.kept.len(),
            deleted = pruned.deleted.len(),
            dry_run = config.dry_run,
            "Snapshot rotation complete"
        );

        Ok(RotationReport {
            today,
            policy,
            created,
            retained_dates,
            pruned,
            dry_run: config.dry_run,
        })
    }

    /// Show what the current policy would keep and delete, without side effects
    ///
    /// Unlike a dry run, no placeholder for today's snapshot is added.
    pub fn preview(&self, config: &RotationConfig) -> Result<PruneReport> {
        config.validate()?;
        let retained = config.retention_policy()?.retained_dates(config.effective_today());
        let snapshots = self.describe_series(&config.volume_id, &config.description)?;
        Ok(partition_by_retention(snapshots, &retained))
    }

    /// Take a snapshot of the configured volume
    ///
    /// Flushes dirty data (best-effort), freezes `freeze_dir` if configured,
    /// issues the create call, and thaws on every exit path. The new snapshot
    /// must come back `pending` or `completed`.
    ///
    /// On a dry run nothing is executed and a pending placeholder dated
    /// `today` is returned.
    pub fn create_snapshot(&self, config: &RotationConfig, today: NaiveDate) -> Result<SnapshotRecord> {
        let volume_id = config.volume_id.as_str();
        let description = config.description.as_str();

        if config.dry_run {
            if let Some(dir) = &config.freeze_dir {
                info!(dry_run = true, path = %dir.display(), "Would freeze filesystem");
            }
            let record = SnapshotRecord::simulated(volume_id, description, today);
            info!(
                dry_run = true,
                snapshot_id = %record.snapshot_id,
                volume_id,
                "Created snapshot"
            );
            if let Some(dir) = &config.freeze_dir {
                info!(dry_run = true, path = %dir.display(), "Would thaw filesystem");
            }
            return Ok(record);
        }

        if let Err(e) = self.fs.sync() {
            warn!(error = %e, "Failed to sync filesystems before snapshot, continuing");
        }

        let guard = match &config.freeze_dir {
            Some(dir) => Some(FreezeGuard::acquire(&self.fs, dir)?),
            None => None,
        };

        let created = self
            .service
            .create_snapshot(volume_id, description)
            .map_err(|e| RotateError::CreateFailed {
                volume_id: volume_id.to_string(),
                reason: e.to_string(),
            })
            .and_then(|record| {
                if record.state.is_acceptable() {
                    Ok(record)
                } else {
                    Err(RotateError::UnexpectedState {
                        snapshot_id: record.snapshot_id,
                        state: record.state.to_string(),
                    })
                }
            });

        if let Some(guard) = guard {
            if let Err(e) = guard.release() {
                // A started snapshot is still usable; only the thaw is reported.
                error!(error = %e, "Failed to thaw filesystem after snapshot");
                #[cfg(feature = "metrics")]
                crate::observability::RotationMetrics::global().record_thaw_failure();
            }
        }

        let record = created.map_err(|e| {
            error!(volume_id, error = %e, "Snapshot creation failed");
            e
        })?;

        info!(
            dry_run = false,
            snapshot_id = %record.snapshot_id,
            volume_id,
            state = %record.state,
            "Created snapshot"
        );
        #[cfg(feature = "metrics")]
        crate::observability::RotationMetrics::global().record_snapshot_created();

        Ok(record)
    }

    /// All snapshots in the configured series
    ///
    /// On a dry run the list also carries the placeholder for the snapshot
    /// the run pretended to create.
    pub fn list_snapshots(&self, config: &RotationConfig, today: NaiveDate) -> Result<Vec<SnapshotRecord>> {
        let mut snapshots = Vec::new();
        if config.dry_run {
            snapshots.push(SnapshotRecord::simulated(
                &config.volume_id,
                &config.description,
                today,
            ));
        }
        snapshots.extend(self.describe_series(&config.volume_id, &config.description)?);
        Ok(snapshots)
    }

    fn describe_series(&self, volume_id: &str, description: &str) -> Result<Vec<SnapshotRecord>> {
        let listed = self
            .service
            .describe_snapshots(volume_id, description)
            .map_err(|e| {
                error!(volume_id, error = %e, "Failed to enumerate snapshots");
                RotateError::enumeration(e.to_string())
            })?;

        // Server-side description filters match wildcards, so insist on equality here.
        let series: Vec<SnapshotRecord> = listed
            .into_iter()
            .filter(|s| s.belongs_to(volume_id, description))
            .collect();

        debug!(volume_id, description, count = series.len(), "Enumerated snapshot series");
        Ok(series)
    }

    /// Delete every snapshot whose creation date is not retained
    ///
    /// The first failed or unacknowledged delete aborts the prune; snapshots
    /// deleted before it stay deleted.
    pub fn prune(
        &self,
        snapshots: Vec<SnapshotRecord>,
        retained: &BTreeSet<NaiveDate>,
        dry_run: bool,
    ) -> Result<PruneReport> {
        self.prune_series(snapshots, retained, dry_run, None)
    }

    /// Prune, never deleting the snapshot identified by `created_id`
    ///
    /// The snapshot a run just created may be stamped with a later date than
    /// the run's `today` (a create that crosses midnight UTC, or an explicit
    /// date override), so its date alone does not protect it.
    fn prune_series(
        &self,
        snapshots: Vec<SnapshotRecord>,
        retained: &BTreeSet<NaiveDate>,
        dry_run: bool,
        created_id: Option<&str>,
    ) -> Result<PruneReport> {
        let PruneReport { mut kept, deleted: candidates } =
            partition_by_retention(snapshots, retained);

        let mut doomed = Vec::with_capacity(candidates.len());
        for snapshot in candidates {
            if created_id == Some(snapshot.snapshot_id.as_str()) {
                warn!(
                    snapshot_id = %snapshot.snapshot_id,
                    date = %snapshot.creation_date(),
                    "Snapshot created by this run is dated outside the retained dates; keeping it"
                );
                kept.push(snapshot);
            } else {
                doomed.push(snapshot);
            }
        }

        for snapshot in &kept {
            debug!(
                snapshot_id = %snapshot.snapshot_id,
                date = %snapshot.creation_date(),
                "Keeping snapshot"
            );
        }

        let mut deleted = Vec::with_capacity(doomed.len());
        for snapshot in doomed {
            if !dry_run {
                self.delete_one(&snapshot).map_err(|e| {
                    error!(
                        snapshot_id = %snapshot.snapshot_id,
                        deleted_so_far = deleted.len(),
                        error = %e,
                        "Pruning aborted; re-run to finish"
                    );
                    e
                })?;
                #[cfg(feature = "metrics")]
                crate::observability::RotationMetrics::global().record_snapshot_deleted();
            }
            info!(
                dry_run,
                snapshot_id = %snapshot.snapshot_id,
                date = %snapshot.creation_date(),
                "Deleted snapshot"
            );
            deleted.push(snapshot);
        }

        Ok(PruneReport { kept, deleted })
    }

    fn delete_one(&self, snapshot: &SnapshotRecord) -> Result<()> {
        let acknowledged = self
            .service
            .delete_snapshot(&snapshot.snapshot_id)
            .map_err(|e| RotateError::DeletionFailed {
                snapshot_id: snapshot.snapshot_id.clone(),
                reason: e.to_string(),
            })?;

        if acknowledged != snapshot.snapshot_id {
            return Err(RotateError::DeletionFailed {
                snapshot_id: snapshot.snapshot_id.clone(),
                reason: format!("unexpected acknowledgment '{acknowledged}'"),
            });
        }
        Ok(())
    }
}

/// Rotator against EC2 with `fsfreeze` quiescing, from a run configuration
#[cfg(feature = "ec2")]
pub fn create_ec2_rotator(
    config: &RotationConfig,
) -> Result<SnapshotRotator<crate::service::Ec2SnapshotService, crate::freeze::FsFreeze>> {
    let service = crate::service::Ec2SnapshotService::new(&config.ec2)?;
    Ok(SnapshotRotator::new(service, crate::freeze::FsFreeze::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freeze::MockFilesystemControl;
    use crate::record::{SnapshotState, SIMULATED_SNAPSHOT_ID};
    use crate::service::{MemorySnapshotService, MockSnapshotService};
    use chrono::{DateTime, TimeZone, Utc};
    use mockall::Sequence;
    use std::path::Path;

    const VOLUME: &str = "vol-06f30e77";
    const SERIES: &str = "db nightly";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 7, 30, 0).unwrap()
    }

    fn snapshot(id: &str, started_at: DateTime<Utc>) -> SnapshotRecord {
        SnapshotRecord::new(id, VOLUME, SERIES, SnapshotState::Completed, started_at)
    }

    /// Two weeks of nightly snapshots ending the day before 2024-03-10
    fn history() -> Vec<SnapshotRecord> {
        let mut snapshots: Vec<SnapshotRecord> = (24..=29)
            .map(|d| snapshot(&format!("snap-02{d}"), at(2024, 2, d)))
            .collect();
        snapshots.extend((1..=9).map(|d| snapshot(&format!("snap-030{d}"), at(2024, 3, d))));
        snapshots
    }

    fn quiet_fs() -> MockFilesystemControl {
        let mut fs = MockFilesystemControl::new();
        fs.expect_sync().returning(|| Ok(()));
        fs
    }

    fn config() -> RotationConfig {
        // 2024-03-10 is a Sunday; daily=3, weekly=2, monthly=1
        RotationConfig::new(VOLUME, SERIES, 6)
            .with_daily(3)
            .with_weekly(2)
            .with_monthly(1)
            .with_today(date(2024, 3, 10))
    }

    #[test]
    fn test_run_deletes_exactly_the_unretained() {
        let service = MemorySnapshotService::new(at(2024, 3, 10)).with_snapshots(history());
        let rotator = SnapshotRotator::new(service, quiet_fs());

        let report = rotator.run(&config()).unwrap();

        assert_eq!(report.created.snapshot_id, "snap-new0001");
        assert_eq!(
            report.retained_dates,
            BTreeSet::from([
                date(2024, 3, 1),
                date(2024, 3, 3),
                date(2024, 3, 8),
                date(2024, 3, 9),
                date(2024, 3, 10),
            ])
        );
        assert_eq!(
            rotator.service().snapshot_ids(),
            vec!["snap-0301", "snap-0303", "snap-0308", "snap-0309", "snap-new0001"]
        );
        assert_eq!(report.pruned.deleted.len(), 11);
        assert_eq!(report.pruned.kept.len(), 5);
        assert_eq!(rotator.service().create_calls(), 1);
        assert_eq!(rotator.service().delete_calls(), 11);
    }

    #[test]
    fn test_dry_run_makes_no_changes_and_same_decisions() {
        let live = SnapshotRotator::new(
            MemorySnapshotService::new(at(2024, 3, 10)).with_snapshots(history()),
            quiet_fs(),
        );
        let live_report = live.run(&config()).unwrap();

        let mut fs = MockFilesystemControl::new();
        fs.expect_sync().times(0);
        fs.expect_freeze().times(0);
        fs.expect_thaw().times(0);
        let simulated = SnapshotRotator::new(
            MemorySnapshotService::new(at(2024, 3, 10)).with_snapshots(history()),
            fs,
        );
        let dry_config = config().with_dry_run(true).with_freeze_dir("/var/lib/db");
        let dry_report = simulated.run(&dry_config).unwrap();

        assert_eq!(simulated.service().create_calls(), 0);
        assert_eq!(simulated.service().delete_calls(), 0);
        assert_eq!(simulated.service().snapshot_ids().len(), history().len());

        assert!(dry_report.dry_run);
        assert_eq!(dry_report.created.snapshot_id, SIMULATED_SNAPSHOT_ID);
        assert_eq!(dry_report.retained_dates, live_report.retained_dates);
        assert_eq!(dry_report.pruned.deleted, live_report.pruned.deleted);
        assert!(dry_report
            .pruned
            .kept
            .iter()
            .any(|s| s.snapshot_id == SIMULATED_SNAPSHOT_ID));
    }

    #[test]
    fn test_configuration_error_before_any_remote_call() {
        // No expectations: any collaborator call panics
        let rotator = SnapshotRotator::new(MockSnapshotService::new(), MockFilesystemControl::new());
        let config = RotationConfig::new(VOLUME, SERIES, 4)
            .with_weekly(3)
            .with_monthly(2);

        let err = rotator.run(&config).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("daily=-1"));
    }

    #[test]
    fn test_create_failure_thaws_once_and_skips_pruning() {
        let mut fs = MockFilesystemControl::new();
        let mut seq = Sequence::new();
        fs.expect_sync().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        fs.expect_freeze().times(1).in_sequence(&mut seq).returning(|_| Ok(()));
        fs.expect_thaw()
            .withf(|p| p == Path::new("/var/lib/db"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut service = MockSnapshotService::new();
        service
            .expect_create_snapshot()
            .times(1)
            .returning(|_, _| Err(RotateError::service("IncorrectState: volume is detaching")));
        service.expect_describe_snapshots().times(0);
        service.expect_delete_snapshot().times(0);

        let rotator = SnapshotRotator::new(service, fs);
        let err = rotator
            .run(&config().with_freeze_dir("/var/lib/db"))
            .unwrap_err();

        match err {
            RotateError::CreateFailed { volume_id, reason } => {
                assert_eq!(volume_id, VOLUME);
                assert!(reason.contains("IncorrectState"));
            }
            other => panic!("Expected CreateFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_error_state_fails_the_run() {
        let mut service = MockSnapshotService::new();
        service.expect_create_snapshot().returning(|vol, desc| {
            Ok(SnapshotRecord::new("snap-bad", vol, desc, SnapshotState::Error, at(2024, 3, 10)))
        });
        service.expect_describe_snapshots().times(0);
        service.expect_delete_snapshot().times(0);

        let rotator = SnapshotRotator::new(service, quiet_fs());
        let err = rotator.run(&config()).unwrap_err();

        assert!(matches!(
            err,
            RotateError::UnexpectedState { ref snapshot_id, ref state }
                if snapshot_id == "snap-bad" && state == "error"
        ));
    }

    #[test]
    fn test_freeze_failure_skips_create() {
        let mut fs = MockFilesystemControl::new();
        fs.expect_sync().returning(|| Ok(()));
        fs.expect_freeze().times(1).returning(|p| {
            Err(RotateError::FreezeFailed {
                path: p.to_path_buf(),
                reason: "Operation not supported".to_string(),
            })
        });
        fs.expect_thaw().times(0);

        let mut service = MockSnapshotService::new();
        service.expect_create_snapshot().times(0);

        let rotator = SnapshotRotator::new(service, fs);
        let err = rotator
            .run(&config().with_freeze_dir("/var/lib/db"))
            .unwrap_err();
        assert!(matches!(err, RotateError::FreezeFailed { .. }));
    }

    #[test]
    fn test_thaw_failure_does_not_fail_the_run() {
        let mut fs = MockFilesystemControl::new();
        fs.expect_sync().returning(|| Ok(()));
        fs.expect_freeze().times(1).returning(|_| Ok(()));
        fs.expect_thaw()
            .times(1)
            .returning(|_| Err(RotateError::service("fsfreeze: unfreeze failed")));

        let service = MemorySnapshotService::new(at(2024, 3, 10)).with_snapshots(history());
        let rotator = SnapshotRotator::new(service, fs);

        let report = rotator.run(&config().with_freeze_dir("/var/lib/db")).unwrap();
        assert_eq!(report.created.state, SnapshotState::Pending);
        assert_eq!(report.pruned.deleted.len(), 11);
    }

    #[test]
    fn test_sync_failure_is_best_effort() {
        let mut fs = MockFilesystemControl::new();
        fs.expect_sync()
            .times(1)
            .returning(|| Err(RotateError::service("sync: not found")));

        let service = MemorySnapshotService::new(at(2024, 3, 10));
        let rotator = SnapshotRotator::new(service, fs);

        assert!(rotator.run(&config()).is_ok());
        assert_eq!(rotator.service().create_calls(), 1);
    }

    #[test]
    fn test_enumeration_failure_aborts_before_pruning() {
        let mut service = MockSnapshotService::new();
        service.expect_create_snapshot().returning(|vol, desc| {
            Ok(SnapshotRecord::new("snap-new", vol, desc, SnapshotState::Pending, at(2024, 3, 10)))
        });
        service
            .expect_describe_snapshots()
            .returning(|_, _| Err(RotateError::service("RequestLimitExceeded")));
        service.expect_delete_snapshot().times(0);

        let rotator = SnapshotRotator::new(service, quiet_fs());
        let err = rotator.run(&config()).unwrap_err();
        assert!(matches!(err, RotateError::Enumeration(ref msg) if msg.contains("RequestLimitExceeded")));
    }

    #[test]
    fn test_deletion_failure_is_fatal_and_keeps_earlier_deletions() {
        let mut service = MockSnapshotService::new();
        service
            .expect_describe_snapshots()
            .returning(|_, _| Ok(vec![
                snapshot("snap-a", at(2024, 2, 1)),
                snapshot("snap-b", at(2024, 2, 2)),
                snapshot("snap-c", at(2024, 2, 3)),
            ]));
        let mut seq = Sequence::new();
        service
            .expect_delete_snapshot()
            .withf(|id| id == "snap-a")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|id| Ok(id.to_string()));
        service
            .expect_delete_snapshot()
            .withf(|id| id == "snap-b")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(RotateError::service("InvalidSnapshot.InUse")));

        let rotator = SnapshotRotator::new(service, quiet_fs());
        let snapshots = rotator.list_snapshots(&config(), date(2024, 3, 10)).unwrap();
        let retained = BTreeSet::from([date(2024, 3, 10)]);

        let err = rotator.prune(snapshots, &retained, false).unwrap_err();
        match err {
            RotateError::DeletionFailed { snapshot_id, reason } => {
                assert_eq!(snapshot_id, "snap-b");
                assert!(reason.contains("InUse"));
            }
            other => panic!("Expected DeletionFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_acknowledgment_is_fatal() {
        let mut service = MockSnapshotService::new();
        service
            .expect_delete_snapshot()
            .returning(|_| Ok("snap-other".to_string()));

        let rotator = SnapshotRotator::new(service, quiet_fs());
        let err = rotator
            .prune(
                vec![snapshot("snap-a", at(2024, 2, 1))],
                &BTreeSet::from([date(2024, 3, 10)]),
                false,
            )
            .unwrap_err();
        assert!(err.to_string().contains("unexpected acknowledgment 'snap-other'"));
    }

    #[test]
    fn test_list_filters_to_exact_series() {
        let other_series = SnapshotRecord::new(
            "snap-other",
            VOLUME,
            "db nightly (manual)",
            SnapshotState::Completed,
            at(2024, 1, 1),
        );
        let service = MemorySnapshotService::new(at(2024, 3, 10))
            .with_snapshots(vec![snapshot("snap-mine", at(2024, 1, 1)), other_series]);
        let rotator = SnapshotRotator::new(service, quiet_fs());

        let report = rotator.run(&config()).unwrap();

        assert_eq!(report.pruned.deleted_ids(), vec!["snap-mine"]);
        assert!(rotator
            .service()
            .snapshot_ids()
            .contains(&"snap-other".to_string()));
    }

    #[test]
    fn test_created_snapshot_survives_date_past_today() {
        // The create lands just after midnight UTC, a day after the run's date
        let service = MemorySnapshotService::new(Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 5).unwrap())
            .with_snapshots(history());
        let rotator = SnapshotRotator::new(service, quiet_fs());

        let report = rotator.run(&config()).unwrap();

        assert_eq!(report.created.creation_date(), date(2024, 3, 11));
        assert!(!report.retained_dates.contains(&date(2024, 3, 11)));
        assert!(rotator
            .service()
            .snapshot_ids()
            .contains(&report.created.snapshot_id));
        assert!(report
            .pruned
            .kept
            .iter()
            .any(|s| s.snapshot_id == report.created.snapshot_id));
        assert!(!report.pruned.deleted_ids().contains(&"snap-new0001"));
        assert_eq!(report.pruned.deleted.len(), 11);
    }

    #[test]
    fn test_direct_prune_has_no_protected_snapshot() {
        let service = MemorySnapshotService::new(at(2024, 3, 10))
            .with_snapshots(vec![snapshot("snap-new0001", at(2024, 3, 11))]);
        let rotator = SnapshotRotator::new(service, quiet_fs());

        let report = rotator
            .prune(
                vec![snapshot("snap-new0001", at(2024, 3, 11))],
                &BTreeSet::from([date(2024, 3, 10)]),
                false,
            )
            .unwrap();
        assert_eq!(report.deleted_ids(), vec!["snap-new0001"]);
    }

    #[test]
    fn test_dry_run_list_includes_placeholder() {
        let service = MemorySnapshotService::new(at(2024, 3, 10));
        let rotator = SnapshotRotator::new(service, quiet_fs());

        let listed = rotator
            .list_snapshots(&config().with_dry_run(true), date(2024, 3, 10))
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_simulated());
        assert_eq!(listed[0].creation_date(), date(2024, 3, 10));
    }

    #[test]
    fn test_retained_date_duplicates_are_all_kept() {
        let snapshots = vec![
            snapshot("snap-1", at(2024, 3, 3)),
            snapshot("snap-2", Utc.with_ymd_and_hms(2024, 3, 3, 23, 0, 0).unwrap()),
            snapshot("snap-3", at(2024, 3, 2)),
        ];
        let retained = BTreeSet::from([date(2024, 3, 3)]);

        let report = partition_by_retention(snapshots, &retained);
        assert_eq!(report.kept.len(), 2);
        assert_eq!(report.deleted_ids(), vec!["snap-3"]);
    }

    #[test]
    fn test_preview_has_no_side_effects() {
        let mut fs = MockFilesystemControl::new();
        fs.expect_sync().times(0);
        let service = MemorySnapshotService::new(at(2024, 3, 10)).with_snapshots(history());
        let rotator = SnapshotRotator::new(service, fs);

        let preview = rotator.preview(&config()).unwrap();
        assert_eq!(preview.kept.len(), 4);
        assert_eq!(preview.deleted.len(), 11);
        assert_eq!(rotator.service().create_calls(), 0);
        assert_eq!(rotator.service().delete_calls(), 0);
    }
}
