//! Cohort analysis engine — buckets event-level rows into cohort×period
//! matrices and derives retention, revenue, ARPU and lifetime-value
//! metrics.
//!
//! The pipeline runs resolve → bucket → aggregate → normalize → report as a
//! pure, synchronous computation over an owned working copy of the input.

pub mod aggregate;
pub mod bucket;
pub mod normalize;
pub mod report;
pub mod resolve;

use std::sync::Arc;

use cohortlens_core::{CohortResult, Frame, Granularity};
use tracing::{info, warn};

pub use aggregate::CohortMatrix;
pub use normalize::NormalizedMetrics;
pub use report::{ChartRefs, CohortReport, RetentionGrid};

/// External heatmap-rendering collaborator. Implementations return an
/// opaque reference (a URL or path) to the rendered artifact.
pub trait ChartRenderer: Send + Sync {
    fn render_retention_heatmap(
        &self,
        grid: &RetentionGrid,
        granularity: Granularity,
    ) -> anyhow::Result<String>;
}

/// Stateless analyzer with its chart collaborator injected. Concurrent
/// callers can share one instance; every invocation works on its own data.
#[derive(Default)]
pub struct CohortAnalyzer {
    renderer: Option<Arc<dyn ChartRenderer>>,
}

impl CohortAnalyzer {
    pub fn new() -> Self {
        Self { renderer: None }
    }

    pub fn with_renderer(renderer: Arc<dyn ChartRenderer>) -> Self {
        Self {
            renderer: Some(renderer),
        }
    }

    /// Run the full cohort analysis over `frame`.
    ///
    /// `revenue_col` switches on the monetization metrics; when the column
    /// is missing or holds no coercible values the revenue outputs are
    /// omitted and the retention analysis still succeeds.
    pub fn analyze(
        &self,
        frame: &Frame,
        user_id_col: &str,
        cohort_col: &str,
        event_col: &str,
        granularity: Granularity,
        revenue_col: Option<&str>,
    ) -> CohortResult<CohortReport> {
        info!(granularity = %granularity, rows = frame.len(), "starting cohort analysis");

        let table = resolve::resolve_columns(frame, user_id_col, cohort_col, event_col, revenue_col)?;
        let bucketed = bucket::bucket_rows(&table, granularity)?;
        let matrix = aggregate::aggregate(&bucketed, table.revenue_present)?;
        let metrics = normalize::normalize(&matrix);

        let total_revenue = resolve::total_revenue(frame, revenue_col);
        let mut result = report::build_report(
            frame.len(),
            &matrix,
            &metrics,
            granularity,
            total_revenue,
        );

        // Rendering failure must never fail the analysis.
        if let Some(renderer) = &self.renderer {
            let grid = report::retention_grid(&matrix, &metrics, granularity);
            match renderer.render_retention_heatmap(&grid, granularity) {
                Ok(reference) => result.charts.retention_heatmap = Some(reference),
                Err(e) => {
                    warn!(error = %e, "retention heatmap rendering failed");
                }
            }
        }

        info!(
            cohorts = result.cohort_sizes.len(),
            analysis_type = ?result.analysis_type,
            "cohort analysis completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohortlens_core::Cell;

    fn event_frame(rows: &[(&str, &str, &str)]) -> Frame {
        let mut frame = Frame::new(vec![
            "user".to_string(),
            "date".to_string(),
            "revenue".to_string(),
        ]);
        for (user, date, revenue) in rows {
            frame
                .push_row(vec![
                    Cell::Str((*user).to_string()),
                    Cell::Str((*date).to_string()),
                    Cell::Str((*revenue).to_string()),
                ])
                .unwrap();
        }
        frame
    }

    #[test]
    fn test_single_user_single_event_boundary() {
        let frame = event_frame(&[("a", "2024-01-05", "10")]);
        let analyzer = CohortAnalyzer::new();
        let report = analyzer
            .analyze(&frame, "user", "date", "date", Granularity::Monthly, None)
            .unwrap();
        assert_eq!(report.total_rows, 1);
        assert_eq!(report.cohort_sizes.len(), 1);
        assert_eq!(report.retention_table["2024-01"]["0"], 1.0);
    }

    #[test]
    fn test_monthly_revenue_scenario() {
        // user A: 2024-01-05 rev 10, 2024-02-10 rev 5, monthly, shared column.
        let frame = event_frame(&[("A", "2024-01-05", "10"), ("A", "2024-02-10", "5")]);
        let analyzer = CohortAnalyzer::new();
        let report = analyzer
            .analyze(
                &frame,
                "user",
                "date",
                "date",
                Granularity::Monthly,
                Some("revenue"),
            )
            .unwrap();

        assert_eq!(report.retention_table["2024-01"]["1"], 1.0);
        let revenue = report.revenue_table.as_ref().unwrap();
        assert_eq!(revenue["2024-01"]["0"], 10.0);
        assert_eq!(revenue["2024-01"]["1"], 5.0);
        assert_eq!(report.ltv_table.as_ref().unwrap()["2024-01"]["1"], 15.0);
        assert_eq!(report.arpu_table.as_ref().unwrap()["2024-01"]["1"], 5.0);
        assert_eq!(report.total_revenue, Some(15.0));
    }

    #[test]
    fn test_non_numeric_revenue_degrades_gracefully() {
        let frame = event_frame(&[("a", "2024-01-05", "free"), ("b", "2024-01-07", "trial")]);
        let analyzer = CohortAnalyzer::new();
        let report = analyzer
            .analyze(
                &frame,
                "user",
                "date",
                "date",
                Granularity::Monthly,
                Some("revenue"),
            )
            .unwrap();
        assert!(report.revenue_table.is_none());
        assert!(report.arpu_table.is_none());
        assert!(report.ltv_table.is_none());
        assert_eq!(report.retention_table["2024-01"]["0"], 1.0);
    }

    struct FailingRenderer;

    impl ChartRenderer for FailingRenderer {
        fn render_retention_heatmap(
            &self,
            _grid: &RetentionGrid,
            _granularity: Granularity,
        ) -> anyhow::Result<String> {
            anyhow::bail!("no display")
        }
    }

    #[test]
    fn test_renderer_failure_never_fails_analysis() {
        let frame = event_frame(&[("a", "2024-01-05", "10")]);
        let analyzer = CohortAnalyzer::with_renderer(Arc::new(FailingRenderer));
        let report = analyzer
            .analyze(&frame, "user", "date", "date", Granularity::Monthly, None)
            .unwrap();
        assert!(report.charts.retention_heatmap.is_none());
    }
}
