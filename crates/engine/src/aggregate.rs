//! Matrix aggregation — pivots deduplicated bucketed rows into dense
//! cohort×period count and revenue grids.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::NaiveDate;
use cohortlens_core::{CohortError, CohortResult};
use tracing::warn;

use crate::bucket::BucketedRow;

/// Cohort×period matrices. Cohorts ascend by bucket boundary; period
/// columns are the distinct observed offsets in ascending order. Cells with
/// no observed activity are explicitly zero.
#[derive(Debug, Clone)]
pub struct CohortMatrix {
    pub cohorts: Vec<NaiveDate>,
    pub periods: Vec<u32>,
    /// Distinct active users per cell, row-major over (cohorts, periods).
    pub counts: Vec<Vec<u64>>,
    /// Summed revenue per cell, same shape as `counts`. `None` when revenue
    /// was not requested or no coercible revenue survived.
    pub revenue: Option<Vec<Vec<f64>>>,
}

impl CohortMatrix {
    pub fn period_column(&self, period: u32) -> Option<usize> {
        self.periods.iter().position(|&p| p == period)
    }
}

/// Pivot rows into the count matrix and, when requested, the revenue
/// matrix.
pub fn aggregate(rows: &[BucketedRow], want_revenue: bool) -> CohortResult<CohortMatrix> {
    if rows.is_empty() {
        return Err(CohortError::Validation(
            "No valid data after cleaning. Please check your data quality and date formats."
                .to_string(),
        ));
    }

    // Rows arrive deduplicated by (customer, cohort, period); duplicates
    // here mean an upstream defect, so sum them and say so.
    let mut cell_users: BTreeMap<(NaiveDate, u32), u64> = BTreeMap::new();
    let mut seen: HashSet<(&str, NaiveDate, u32)> = HashSet::new();
    let mut duplicates = 0usize;
    let mut periods: BTreeSet<u32> = BTreeSet::new();
    let mut cohorts: BTreeSet<NaiveDate> = BTreeSet::new();

    for row in rows {
        if !seen.insert((row.customer_id.as_str(), row.cohort_period, row.period_index)) {
            duplicates += 1;
        }
        *cell_users
            .entry((row.cohort_period, row.period_index))
            .or_insert(0) += 1;
        periods.insert(row.period_index);
        cohorts.insert(row.cohort_period);
    }
    if duplicates > 0 {
        warn!(duplicates, "duplicate cohort/period keys found, summing before pivot");
    }

    let cohorts: Vec<NaiveDate> = cohorts.into_iter().collect();
    let periods: Vec<u32> = periods.into_iter().collect();

    if periods.is_empty() {
        return Err(CohortError::Validation(
            "No cohort data found. Please check your data and column selections.".to_string(),
        ));
    }
    if periods[0] != 0 {
        return Err(CohortError::Validation(
            "No period 0 data found. This indicates no users in their first period.".to_string(),
        ));
    }

    let counts: Vec<Vec<u64>> = cohorts
        .iter()
        .map(|cohort| {
            periods
                .iter()
                .map(|period| cell_users.get(&(*cohort, *period)).copied().unwrap_or(0))
                .collect()
        })
        .collect();

    let revenue = if want_revenue {
        build_revenue(rows, &cohorts, &periods)
    } else {
        None
    };

    Ok(CohortMatrix {
        cohorts,
        periods,
        counts,
        revenue,
    })
}

/// Revenue pivot over the same axes as the count matrix, zero-filled.
/// Rows whose revenue was not numeric-coercible are excluded from the sum
/// but still participate in the count matrix. Returns `None` when no valid
/// revenue rows remain — the degraded-but-successful path.
fn build_revenue(
    rows: &[BucketedRow],
    cohorts: &[NaiveDate],
    periods: &[u32],
) -> Option<Vec<Vec<f64>>> {
    let mut cell_revenue: BTreeMap<(NaiveDate, u32), f64> = BTreeMap::new();
    let mut valid_rows = 0usize;
    for row in rows {
        if let Some(amount) = row.revenue {
            *cell_revenue
                .entry((row.cohort_period, row.period_index))
                .or_insert(0.0) += amount;
            valid_rows += 1;
        }
    }
    if valid_rows == 0 {
        warn!("no valid revenue data found, omitting revenue metrics");
        return None;
    }

    Some(
        cohorts
            .iter()
            .map(|cohort| {
                periods
                    .iter()
                    .map(|period| cell_revenue.get(&(*cohort, *period)).copied().unwrap_or(0.0))
                    .collect()
            })
            .collect(),
    )
}
