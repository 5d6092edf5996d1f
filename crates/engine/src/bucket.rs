//! Period bucketing — classifies every canonical row into a cohort bucket
//! and an activity bucket, and derives the relative period offset.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use cohortlens_core::{CohortError, CohortResult, Granularity};
use tracing::debug;

use crate::resolve::CanonicalTable;

/// A canonical row placed on the cohort×period grid.
#[derive(Debug, Clone)]
pub struct BucketedRow {
    pub customer_id: String,
    pub cohort_period: NaiveDate,
    pub activity_period: NaiveDate,
    pub period_index: u32,
    pub revenue: Option<f64>,
}

/// Align a date to the start of its bucket.
///
/// Weeks start on Monday, on both the cohort and the activity side.
pub fn bucket_start(date: NaiveDate, granularity: Granularity) -> Option<NaiveDate> {
    match granularity {
        Granularity::Daily => Some(date),
        Granularity::Weekly => {
            let back = i64::from(date.weekday().num_days_from_monday());
            date.checked_sub_signed(Duration::days(back))
        }
        Granularity::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
        Granularity::Quarterly => {
            let quarter_month = (date.month0() / 3) * 3 + 1;
            NaiveDate::from_ymd_opt(date.year(), quarter_month, 1)
        }
        Granularity::Yearly => NaiveDate::from_ymd_opt(date.year(), 1, 1),
    }
}

/// Offset between two bucket boundaries, in bucket units. Calendar-aware
/// for monthly and coarser granularities (January to March is two months
/// regardless of day counts).
pub fn period_offset(cohort: NaiveDate, activity: NaiveDate, granularity: Granularity) -> i64 {
    match granularity {
        Granularity::Daily => (activity - cohort).num_days(),
        // Both boundaries are Monday-aligned, so the day distance is an
        // exact multiple of seven.
        Granularity::Weekly => (activity - cohort).num_days() / 7,
        Granularity::Monthly => months_between(cohort, activity),
        Granularity::Quarterly => {
            let a = i64::from(activity.year()) * 4 + i64::from(activity.month0() / 3);
            let c = i64::from(cohort.year()) * 4 + i64::from(cohort.month0() / 3);
            a - c
        }
        Granularity::Yearly => i64::from(activity.year()) - i64::from(cohort.year()),
    }
}

fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    let a = i64::from(to.year()) * 12 + i64::from(to.month0());
    let b = i64::from(from.year()) * 12 + i64::from(from.month0());
    a - b
}

/// Bucket every row, drop rows with null dates or negative offsets, and
/// deduplicate by (customer, cohort, period) so a user counts once per
/// period no matter how many raw events they generated in it.
pub fn bucket_rows(
    table: &CanonicalTable,
    granularity: Granularity,
) -> CohortResult<Vec<BucketedRow>> {
    // When cohort and event share a column, the cohort is the bucket of the
    // user's earliest activity across the whole table.
    let first_activity: HashMap<&str, NaiveDateTime> = if table.shared_date_column {
        let mut map: HashMap<&str, NaiveDateTime> = HashMap::new();
        for row in &table.rows {
            if let Some(ts) = row.invoice_date {
                map.entry(row.customer_id.as_str())
                    .and_modify(|min| {
                        if ts < *min {
                            *min = ts;
                        }
                    })
                    .or_insert(ts);
            }
        }
        map
    } else {
        HashMap::new()
    };

    let mut seen: HashSet<(String, NaiveDate, u32)> = HashSet::new();
    let mut out = Vec::with_capacity(table.rows.len());
    let mut dropped_null = 0usize;
    let mut dropped_negative = 0usize;

    for row in &table.rows {
        let Some(invoice) = row.invoice_date else {
            dropped_null += 1;
            continue;
        };
        let cohort_basis = if table.shared_date_column {
            first_activity.get(row.customer_id.as_str()).copied()
        } else {
            row.cohort_date
        };
        let Some(cohort_basis) = cohort_basis else {
            dropped_null += 1;
            continue;
        };

        let (Some(cohort_period), Some(activity_period)) = (
            bucket_start(cohort_basis.date(), granularity),
            bucket_start(invoice.date(), granularity),
        ) else {
            return Err(CohortError::stage(
                format!("{granularity} cohort calculation").as_str(),
                "bucket boundary out of the supported date range",
            ));
        };

        let offset = period_offset(cohort_period, activity_period, granularity);
        if offset < 0 {
            // Activity strictly before the assigned cohort start. Impossible
            // for derived cohorts, possible with an explicit cohort column.
            dropped_negative += 1;
            continue;
        }
        let period_index = u32::try_from(offset).map_err(|_| {
            CohortError::stage(
                format!("{granularity} cohort calculation").as_str(),
                format!("period offset {offset} exceeds the supported range"),
            )
        })?;

        if !seen.insert((row.customer_id.clone(), cohort_period, period_index)) {
            continue;
        }
        out.push(BucketedRow {
            customer_id: row.customer_id.clone(),
            cohort_period,
            activity_period,
            period_index,
            revenue: row.revenue,
        });
    }

    debug!(
        kept = out.len(),
        dropped_null,
        dropped_negative,
        granularity = %granularity,
        "bucketed rows"
    );
    Ok(out)
}
