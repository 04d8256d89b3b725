/*!
Tiered retention: which calendar dates of a snapshot series are worth keeping.

A series keeps the last `daily` days (counting today), the last `weekly`
Sundays (counting the most recent Sunday on or before today) and the last
`monthly` first-of-month days (counting the first of the current month).
The tiers overlap freely; the result is the union of all three.
*/

use crate::{Result, RotateError};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How many snapshots of each tier a series retains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    daily: u32,
    weekly: u32,
    monthly: u32,
}

impl RetentionPolicy {
    /// Build a policy from explicit tier counts
    ///
    /// # Errors
    /// `RotateError::Configuration` if `daily` is zero; today's snapshot
    /// would otherwise be deleted as soon as it is created.
    pub fn new(daily: u32, weekly: u32, monthly: u32) -> Result<Self> {
        if daily < 1 {
            return Err(RotateError::configuration(format!(
                "Must keep at least one daily snapshot (daily={daily}, weekly={weekly}, monthly={monthly})"
            )));
        }
        Ok(Self {
            daily,
            weekly,
            monthly,
        })
    }

    /// Derive a policy from an overall cap, filling in unset tiers
    ///
    /// Unset `weekly` and `monthly` each default to `max_snapshots / 4`
    /// (truncating), and unset `daily` takes whatever remains of the cap.
    ///
    /// # Example
    /// ```rust
    /// use rollsnap_core::RetentionPolicy;
    ///
    /// let policy = RetentionPolicy::from_max(10, None, None, None)?;
    /// assert_eq!((policy.daily(), policy.weekly(), policy.monthly()), (6, 2, 2));
    /// # Ok::<(), rollsnap_core::RotateError>(())
    /// ```
    pub fn from_max(
        max_snapshots: u32,
        daily: Option<u32>,
        weekly: Option<u32>,
        monthly: Option<u32>,
    ) -> Result<Self> {
        let weekly = weekly.unwrap_or(max_snapshots / 4);
        let monthly = monthly.unwrap_or(max_snapshots / 4);
        let daily = match daily {
            Some(daily) => i64::from(daily),
            None => i64::from(max_snapshots) - i64::from(weekly) - i64::from(monthly),
        };

        if daily < 1 {
            return Err(RotateError::configuration(format!(
                "Must keep at least one daily snapshot (daily={daily}, weekly={weekly}, monthly={monthly}, max={max_snapshots})"
            )));
        }
        // daily is in 1..=u32::MAX here: it is either a u32 or max minus two non-negatives
        Self::new(daily as u32, weekly, monthly)
    }

    pub fn daily(&self) -> u32 {
        self.daily
    }

    pub fn weekly(&self) -> u32 {
        self.weekly
    }

    pub fn monthly(&self) -> u32 {
        self.monthly
    }

    /// Dates to keep when rotating on `today`
    pub fn retained_dates(&self, today: NaiveDate) -> BTreeSet<NaiveDate> {
        retained_dates(today, self.daily, self.weekly, self.monthly)
    }
}

/// Compute the set of dates whose snapshots should be kept
///
/// Pure function of its inputs; `today` is never read from a clock here.
/// Dates that would fall before the earliest representable date are skipped.
pub fn retained_dates(today: NaiveDate, daily: u32, weekly: u32, monthly: u32) -> BTreeSet<NaiveDate> {
    let mut keep = BTreeSet::new();

    keep.extend(
        (0..daily).filter_map(|i| today.checked_sub_days(Days::new(u64::from(i)))),
    );

    // Sunday is weekday 6 counting from Monday, so this lands on today when today is a Sunday.
    let back_to_sunday = (today.weekday().num_days_from_monday() + 1) % 7;
    if let Some(last_sunday) = today.checked_sub_days(Days::new(u64::from(back_to_sunday))) {
        keep.extend(
            (0..weekly).filter_map(|i| last_sunday.checked_sub_days(Days::new(7 * u64::from(i)))),
        );
    }

    if let Some(first_of_month) = today.with_day(1) {
        keep.extend(
            (0..monthly).filter_map(|i| first_of_month.checked_sub_months(Months::new(i))),
        );
    }

    keep
}
