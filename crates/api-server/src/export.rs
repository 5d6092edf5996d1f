//! Background export of analysis result tables as CSV files. The export is
//! decoupled from the response: the numeric result returns immediately and
//! the job flips to ready once the files are on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cohortlens_core::CohortResult;
use cohortlens_engine::CohortReport;
use tracing::{error, info};

use crate::jobs::{JobStatus, JobStore};

/// Write every table the report carries and mark the job ready (or failed).
pub async fn export_results(
    jobs: Arc<JobStore>,
    export_dir: PathBuf,
    job_id: String,
    report: CohortReport,
) {
    let dir = export_dir.join(&job_id);
    let result = tokio::task::spawn_blocking({
        let dir = dir.clone();
        move || write_tables(&dir, &report)
    })
    .await;

    match result {
        Ok(Ok(())) => {
            info!(job_id = %job_id, dir = %dir.display(), "result export ready");
            jobs.update(
                &job_id,
                JobStatus::Ready,
                Some(format!("/exports/{job_id}")),
            );
        }
        Ok(Err(e)) => {
            error!(job_id = %job_id, error = %e, "result export failed");
            jobs.update(&job_id, JobStatus::Failed, None);
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "result export task panicked");
            jobs.update(&job_id, JobStatus::Failed, None);
        }
    }
}

fn write_tables(dir: &Path, report: &CohortReport) -> CohortResult<()> {
    std::fs::create_dir_all(dir)?;

    std::fs::write(
        dir.join("retention_table.csv"),
        table_to_csv(&report.retention_table),
    )?;
    std::fs::write(dir.join("cohort_sizes.csv"), sizes_to_csv(&report.cohort_sizes))?;
    for (name, table) in [
        ("revenue_table", &report.revenue_table),
        ("arpu_table", &report.arpu_table),
        ("ltv_table", &report.ltv_table),
    ] {
        if let Some(table) = table {
            std::fs::write(dir.join(format!("{name}.csv")), table_to_csv(table))?;
        }
    }
    Ok(())
}

/// Render a cohort→period→value mapping as CSV with period columns in
/// numeric order. Absent cells are left empty.
fn table_to_csv(table: &BTreeMap<String, BTreeMap<String, f64>>) -> String {
    let mut periods: Vec<u32> = table
        .values()
        .flat_map(|row| row.keys())
        .filter_map(|k| k.parse().ok())
        .collect();
    periods.sort_unstable();
    periods.dedup();

    let mut out = String::from("cohort");
    for p in &periods {
        out.push(',');
        out.push_str(&p.to_string());
    }
    out.push('\n');
    for (cohort, row) in table {
        out.push_str(cohort);
        for p in &periods {
            out.push(',');
            if let Some(value) = row.get(&p.to_string()) {
                out.push_str(&value.to_string());
            }
        }
        out.push('\n');
    }
    out
}

fn sizes_to_csv(sizes: &BTreeMap<String, u64>) -> String {
    let mut out = String::from("cohort,size\n");
    for (cohort, size) in sizes {
        out.push_str(cohort);
        out.push(',');
        out.push_str(&size.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_to_csv_numeric_period_order() {
        let mut row = BTreeMap::new();
        for p in ["0", "2", "10"] {
            row.insert(p.to_string(), 1.0);
        }
        let mut table = BTreeMap::new();
        table.insert("2024-01".to_string(), row);

        let csv = table_to_csv(&table);
        let mut lines = csv.lines();
        // Periods sort numerically, not lexicographically.
        assert_eq!(lines.next(), Some("cohort,0,2,10"));
        assert_eq!(lines.next(), Some("2024-01,1,1,1"));
    }

    #[test]
    fn test_table_to_csv_absent_cells_empty() {
        let mut table = BTreeMap::new();
        let mut a = BTreeMap::new();
        a.insert("0".to_string(), 1.0);
        table.insert("2024-01".to_string(), a);
        let mut b = BTreeMap::new();
        b.insert("1".to_string(), 0.5);
        table.insert("2024-02".to_string(), b);

        let csv = table_to_csv(&table);
        assert!(csv.contains("2024-01,1,\n"));
        assert!(csv.contains("2024-02,,0.5\n"));
    }

    #[test]
    fn test_sizes_to_csv() {
        let mut sizes = BTreeMap::new();
        sizes.insert("2024-01".to_string(), 12);
        assert_eq!(sizes_to_csv(&sizes), "cohort,size\n2024-01,12\n");
    }
}
