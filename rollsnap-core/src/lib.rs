/*!
# Rollsnap Core Engine

Rolling block-volume snapshots with tiered date-based retention.

Each run takes a fresh snapshot of one volume, lists the volume's snapshot
series (identified by volume id plus an exact description), and deletes the
snapshots whose creation date falls outside the retained set:

- the most recent `daily` days, counting today
- the most recent `weekly` Sundays, counting the current week's Sunday
- the first day of the most recent `monthly` months, counting this month

## Architecture

Snapshot control-plane calls go through the [`SnapshotService`] port and
filesystem quiescing goes through [`FilesystemControl`], so the engine in
[`rotation`] can be driven against EC2 or an in-memory double alike.

## Usage

```rust,no_run
use rollsnap_core::{create_ec2_rotator, RotationConfig};

let config = RotationConfig::new("vol-06f30e77", "db nightly", 10)
    .with_freeze_dir("/var/lib/postgresql")
    .with_dry_run(true);

let rotator = create_ec2_rotator(&config)?;
let report = rotator.run(&config)?;
for snapshot in &report.pruned.deleted {
    println!("{} {}", snapshot.snapshot_id, snapshot.creation_date());
}
# Ok::<(), rollsnap_core::RotateError>(())
```
*/

pub mod config;
pub mod error;
pub mod freeze;
pub mod observability;
pub mod record;
pub mod retention;
pub mod rotation;
pub mod service;


pub use config::{Ec2Config, RotationConfig};
pub use error::{Result, RotateError};
pub use freeze::{FilesystemControl, FreezeGuard, FsFreeze};
pub use record::{SnapshotRecord, SnapshotState};
pub use retention::{retained_dates, RetentionPolicy};
#[cfg(feature = "ec2")]
pub use rotation::create_ec2_rotator;
pub use rotation::{partition_by_retention, PruneReport, RotationReport, SnapshotRotator};
#[cfg(feature = "ec2")]
pub use service::Ec2SnapshotService;
pub use service::SnapshotService;
