//! Metric normalization — retention rates from raw counts, plus the
//! revenue-derived ARPU and lifetime-value grids.

use crate::aggregate::CohortMatrix;

/// Normalized metrics, row-major over the matrix's (cohorts, periods).
#[derive(Debug, Clone)]
pub struct NormalizedMetrics {
    /// Fraction of each cohort's period-0 size active per period.
    pub retention: Vec<Vec<f64>>,
    /// Period-0 size per cohort — fixed at formation and reused as the
    /// divisor for the whole row.
    pub cohort_sizes: Vec<u64>,
    /// Revenue ÷ active users; exactly 0.0 where a cell has no users.
    pub arpu: Option<Vec<Vec<f64>>>,
    /// Running sum of raw revenue across periods in ascending order.
    /// Rounding happens at the serialization boundary, never here, so
    /// cumulative sums do not compound rounding error.
    pub ltv: Option<Vec<Vec<f64>>>,
}

pub fn normalize(matrix: &CohortMatrix) -> NormalizedMetrics {
    let zero_col = matrix.period_column(0).unwrap_or(0);
    let cohort_sizes: Vec<u64> = matrix.counts.iter().map(|row| row[zero_col]).collect();

    let retention: Vec<Vec<f64>> = matrix
        .counts
        .iter()
        .zip(&cohort_sizes)
        .map(|(row, &size)| {
            row.iter()
                .map(|&count| {
                    if size > 0 {
                        count as f64 / size as f64
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    let (arpu, ltv) = match &matrix.revenue {
        Some(revenue) => {
            let arpu = revenue
                .iter()
                .zip(&matrix.counts)
                .map(|(rev_row, count_row)| {
                    rev_row
                        .iter()
                        .zip(count_row)
                        .map(|(&rev, &count)| if count > 0 { rev / count as f64 } else { 0.0 })
                        .collect()
                })
                .collect();
            let ltv = revenue
                .iter()
                .map(|rev_row| {
                    let mut cumulative = 0.0;
                    rev_row
                        .iter()
                        .map(|&rev| {
                            cumulative += rev;
                            cumulative
                        })
                        .collect()
                })
                .collect();
            (Some(arpu), Some(ltv))
        }
        None => (None, None),
    };

    NormalizedMetrics {
        retention,
        cohort_sizes,
        arpu,
        ltv,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn matrix(counts: Vec<Vec<u64>>, revenue: Option<Vec<Vec<f64>>>) -> CohortMatrix {
        let cohorts = (0..counts.len())
            .map(|i| NaiveDate::from_ymd_opt(2024, 1 + i as u32, 1).unwrap())
            .collect();
        let periods = (0..counts[0].len() as u32).collect();
        CohortMatrix {
            cohorts,
            periods,
            counts,
            revenue,
        }
    }

    #[test]
    fn test_retention_period_zero_is_exactly_one() {
        let m = matrix(vec![vec![4, 2, 1], vec![10, 5, 0]], None);
        let n = normalize(&m);
        for row in &n.retention {
            assert_eq!(row[0], 1.0);
        }
        assert_eq!(n.retention[0][1], 0.5);
        assert_eq!(n.retention[1][2], 0.0);
        assert_eq!(n.cohort_sizes, vec![4, 10]);
    }

    #[test]
    fn test_arpu_zero_when_no_active_users() {
        let m = matrix(
            vec![vec![2, 0]],
            Some(vec![vec![10.0, 4.0]]),
        );
        let n = normalize(&m);
        let arpu = n.arpu.unwrap();
        assert_eq!(arpu[0][0], 5.0);
        // Revenue with zero active users still yields exactly 0.0.
        assert_eq!(arpu[0][1], 0.0);
    }

    #[test]
    fn test_ltv_is_prefix_sum_of_raw_revenue() {
        let m = matrix(
            vec![vec![3, 2, 1]],
            Some(vec![vec![10.0, 5.0, 2.5]]),
        );
        let n = normalize(&m);
        assert_eq!(n.ltv.unwrap()[0], vec![10.0, 15.0, 17.5]);
    }

    #[test]
    fn test_negative_revenue_may_decrease_ltv() {
        // Refunds are legitimate; cumulative value is allowed to drop.
        let m = matrix(vec![vec![1, 1]], Some(vec![vec![10.0, -4.0]]));
        let n = normalize(&m);
        assert_eq!(n.ltv.unwrap()[0], vec![10.0, 6.0]);
    }
}
