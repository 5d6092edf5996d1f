//! Result serialization — converts the numeric matrices into the
//! caller-facing nested mappings keyed by cohort label and period index.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use cohortlens_core::types::AnalysisMetric;
use cohortlens_core::Granularity;
use serde::{Deserialize, Serialize};

use crate::aggregate::CohortMatrix;
use crate::normalize::NormalizedMetrics;

/// Opaque references to rendered chart artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartRefs {
    pub retention_heatmap: Option<String>,
}

/// The caller-facing analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortReport {
    pub total_rows: usize,
    pub retention_table: BTreeMap<String, BTreeMap<String, f64>>,
    pub cohort_sizes: BTreeMap<String, u64>,
    pub interval: Granularity,
    pub analysis_type: AnalysisMetric,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue_table: Option<BTreeMap<String, BTreeMap<String, f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arpu_table: Option<BTreeMap<String, BTreeMap<String, f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ltv_table: Option<BTreeMap<String, BTreeMap<String, f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_revenue: Option<f64>,
    #[serde(default)]
    pub charts: ChartRefs,
}

/// The normalized retention surface handed to the chart collaborator.
#[derive(Debug, Clone)]
pub struct RetentionGrid {
    pub cohort_labels: Vec<String>,
    pub periods: Vec<u32>,
    pub cells: Vec<Vec<f64>>,
}

/// Human-readable cohort label per granularity. Weekly cohorts are labeled
/// by their Monday week-start date on every output table; the year-week
/// form is deliberately not used anywhere.
pub fn cohort_label(cohort: NaiveDate, granularity: Granularity) -> String {
    match granularity {
        Granularity::Daily | Granularity::Weekly => cohort.format("%Y-%m-%d").to_string(),
        Granularity::Monthly | Granularity::Quarterly => cohort.format("%Y-%m").to_string(),
        Granularity::Yearly => cohort.year().to_string(),
    }
}

/// Monetary rounding, applied only at this boundary.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn retention_grid(
    matrix: &CohortMatrix,
    metrics: &NormalizedMetrics,
    granularity: Granularity,
) -> RetentionGrid {
    RetentionGrid {
        cohort_labels: matrix
            .cohorts
            .iter()
            .map(|c| cohort_label(*c, granularity))
            .collect(),
        periods: matrix.periods.clone(),
        cells: metrics.retention.clone(),
    }
}

/// Assemble the report from the matrices. Retention cells that are zero are
/// omitted — absence at an offset is distinct from observed 0% retention.
/// Revenue, ARPU and LTV mappings are dense over the count matrix's cohorts
/// and period columns.
pub fn build_report(
    total_rows: usize,
    matrix: &CohortMatrix,
    metrics: &NormalizedMetrics,
    granularity: Granularity,
    total_revenue: Option<f64>,
) -> CohortReport {
    let labels: Vec<String> = matrix
        .cohorts
        .iter()
        .map(|c| cohort_label(*c, granularity))
        .collect();

    let mut retention_table = BTreeMap::new();
    let mut cohort_sizes = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        let mut row = BTreeMap::new();
        for (j, period) in matrix.periods.iter().enumerate() {
            let rate = metrics.retention[i][j];
            if rate > 0.0 {
                row.insert(period.to_string(), rate);
            }
        }
        retention_table.insert(label.clone(), row);
        cohort_sizes.insert(label.clone(), metrics.cohort_sizes[i]);
    }

    let (revenue_table, arpu_table, ltv_table) = match (&matrix.revenue, &metrics.arpu, &metrics.ltv)
    {
        (Some(revenue), Some(arpu), Some(ltv)) => {
            let dense = |grid: &Vec<Vec<f64>>| -> BTreeMap<String, BTreeMap<String, f64>> {
                labels
                    .iter()
                    .enumerate()
                    .map(|(i, label)| {
                        let row = matrix
                            .periods
                            .iter()
                            .enumerate()
                            .map(|(j, period)| (period.to_string(), round2(grid[i][j])))
                            .collect();
                        (label.clone(), row)
                    })
                    .collect()
            };
            (Some(dense(revenue)), Some(dense(arpu)), Some(dense(ltv)))
        }
        _ => (None, None, None),
    };

    let analysis_type = if revenue_table.is_some() {
        AnalysisMetric::Revenue
    } else {
        AnalysisMetric::Retention
    };

    CohortReport {
        total_rows,
        retention_table,
        cohort_sizes,
        interval: granularity,
        analysis_type,
        revenue_table,
        arpu_table,
        ltv_table,
        total_revenue: total_revenue.map(round2),
        charts: ChartRefs::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_cohort_labels_per_granularity() {
        let d = date(2024, 2, 12);
        assert_eq!(cohort_label(d, Granularity::Daily), "2024-02-12");
        assert_eq!(cohort_label(d, Granularity::Weekly), "2024-02-12");
        assert_eq!(cohort_label(d, Granularity::Monthly), "2024-02");
        assert_eq!(cohort_label(date(2024, 1, 1), Granularity::Quarterly), "2024-01");
        assert_eq!(cohort_label(date(2024, 1, 1), Granularity::Yearly), "2024");
    }

    fn sample() -> (CohortMatrix, NormalizedMetrics) {
        let matrix = CohortMatrix {
            cohorts: vec![date(2024, 1, 1)],
            periods: vec![0, 1, 2],
            counts: vec![vec![2, 1, 0]],
            revenue: Some(vec![vec![10.0, 5.006, 0.0]]),
        };
        let metrics = crate::normalize::normalize(&matrix);
        (matrix, metrics)
    }

    #[test]
    fn test_retention_sparse_revenue_dense() {
        let (matrix, metrics) = sample();
        let report = build_report(3, &matrix, &metrics, Granularity::Monthly, Some(15.006));

        let retention = &report.retention_table["2024-01"];
        assert_eq!(retention["0"], 1.0);
        assert_eq!(retention["1"], 0.5);
        // Zero-retention cell omitted, not emitted as 0.
        assert!(!retention.contains_key("2"));

        let revenue = report.revenue_table.as_ref().unwrap();
        assert_eq!(revenue["2024-01"].len(), 3);
        assert_eq!(revenue["2024-01"]["2"], 0.0);
        // Rounded at emission.
        assert_eq!(revenue["2024-01"]["1"], 5.01);
        assert_eq!(report.total_revenue, Some(15.01));
        assert_eq!(report.cohort_sizes["2024-01"], 2);
        assert_eq!(report.analysis_type, AnalysisMetric::Revenue);
    }

    #[test]
    fn test_no_revenue_is_retention_type() {
        let matrix = CohortMatrix {
            cohorts: vec![date(2024, 1, 1)],
            periods: vec![0],
            counts: vec![vec![1]],
            revenue: None,
        };
        let metrics = crate::normalize::normalize(&matrix);
        let report = build_report(1, &matrix, &metrics, Granularity::Monthly, None);
        assert_eq!(report.analysis_type, AnalysisMetric::Retention);
        assert!(report.revenue_table.is_none());
        assert!(report.arpu_table.is_none());
        assert!(report.ltv_table.is_none());
    }
}
