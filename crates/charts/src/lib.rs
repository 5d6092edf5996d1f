//! Retention heatmap rendering — turns a normalized retention grid into an
//! SVG artifact on disk and hands back its public URL path.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::Utc;
use cohortlens_core::Granularity;
use cohortlens_engine::{ChartRenderer, RetentionGrid};
use tracing::{info, warn};

/// Heatmaps larger than this are truncated to keep the artifact readable.
const MAX_COHORTS: usize = 15;
const MAX_PERIODS: usize = 12;

const CELL_W: usize = 64;
const CELL_H: usize = 28;
const LABEL_W: usize = 90;
const HEADER_H: usize = 64;

/// SVG heatmap renderer. The output directory is injected; it is the
/// binary's job to create it at startup.
pub struct SvgHeatmap {
    charts_dir: PathBuf,
    public_base: String,
}

impl SvgHeatmap {
    pub fn new(charts_dir: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            charts_dir: charts_dir.into(),
            public_base: public_base.into(),
        }
    }

    /// Build the SVG document for a grid. Pure; no filesystem involved.
    pub fn build_svg(grid: &RetentionGrid, granularity: Granularity) -> String {
        let rows = grid.cohort_labels.len().min(MAX_COHORTS);
        let cols = grid.periods.len().min(MAX_PERIODS);
        if rows < grid.cohort_labels.len() {
            warn!(limit = MAX_COHORTS, "limiting cohorts for heatmap");
        }
        if cols < grid.periods.len() {
            warn!(limit = MAX_PERIODS, "limiting periods for heatmap");
        }

        let width = LABEL_W + cols * CELL_W + 20;
        let height = HEADER_H + rows * CELL_H + 20;
        let mut svg = String::new();
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" font-family="sans-serif">"#
        );
        let _ = write!(
            svg,
            r#"<text x="{x}" y="22" font-size="15" font-weight="bold" text-anchor="middle">{title} Cohort Retention Heatmap</text>"#,
            x = width / 2,
            title = title_case(granularity.as_str()),
        );

        let prefix = period_prefix(granularity);
        for (j, period) in grid.periods.iter().take(cols).enumerate() {
            let _ = write!(
                svg,
                r#"<text x="{x}" y="{y}" font-size="11" text-anchor="middle">{prefix} {period}</text>"#,
                x = LABEL_W + j * CELL_W + CELL_W / 2,
                y = HEADER_H - 10,
            );
        }

        for (i, label) in grid.cohort_labels.iter().take(rows).enumerate() {
            let y = HEADER_H + i * CELL_H;
            let _ = write!(
                svg,
                r#"<text x="{x}" y="{ty}" font-size="11" text-anchor="end">{label}</text>"#,
                x = LABEL_W - 6,
                ty = y + CELL_H / 2 + 4,
            );
            for j in 0..cols {
                let rate = grid.cells[i][j];
                let (fill, text_color) = cell_colors(rate);
                let x = LABEL_W + j * CELL_W;
                let _ = write!(
                    svg,
                    r#"<rect x="{x}" y="{y}" width="{CELL_W}" height="{CELL_H}" fill="{fill}" stroke="white" stroke-width="0.5"/>"#
                );
                if rate > 0.0 {
                    let _ = write!(
                        svg,
                        r#"<text x="{tx}" y="{ty}" font-size="10" fill="{text_color}" text-anchor="middle">{pct:.1}%</text>"#,
                        tx = x + CELL_W / 2,
                        ty = y + CELL_H / 2 + 4,
                        pct = rate * 100.0,
                    );
                }
            }
        }

        svg.push_str("</svg>");
        svg
    }
}

impl ChartRenderer for SvgHeatmap {
    fn render_retention_heatmap(
        &self,
        grid: &RetentionGrid,
        granularity: Granularity,
    ) -> anyhow::Result<String> {
        let svg = Self::build_svg(grid, granularity);
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("retention_heatmap_{granularity}_{timestamp}.svg");
        let path = self.charts_dir.join(&filename);
        std::fs::write(&path, svg)?;
        info!(path = %path.display(), "retention heatmap saved");
        Ok(format!("{}/{filename}", self.public_base))
    }
}

fn period_prefix(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Daily => "Day",
        Granularity::Weekly => "Week",
        Granularity::Monthly => "Month",
        Granularity::Quarterly => "Quarter",
        Granularity::Yearly => "Year",
    }
}

fn title_case(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Sequential yellow-to-red ramp over the [0, 1] retention rate, with a
/// readable text color per band.
fn cell_colors(rate: f64) -> (String, &'static str) {
    let t = rate.clamp(0.0, 1.0);
    let stops = [(255u8, 255u8, 204u8), (254, 178, 76), (240, 59, 32)];
    let (from, to, local) = if t < 0.5 {
        (stops[0], stops[1], t * 2.0)
    } else {
        (stops[1], stops[2], (t - 0.5) * 2.0)
    };
    let lerp = |a: u8, b: u8| -> u8 {
        (f64::from(a) + (f64::from(b) - f64::from(a)) * local).round() as u8
    };
    let fill = format!("#{:02x}{:02x}{:02x}", lerp(from.0, to.0), lerp(from.1, to.1), lerp(from.2, to.2));
    let text = if t > 0.6 { "white" } else { "#333333" };
    (fill, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: usize, cols: usize) -> RetentionGrid {
        RetentionGrid {
            cohort_labels: (0..rows).map(|i| format!("2024-{:02}", i + 1)).collect(),
            periods: (0..cols as u32).collect(),
            cells: (0..rows)
                .map(|_| (0..cols).map(|j| 1.0 / (j as f64 + 1.0)).collect())
                .collect(),
        }
    }

    #[test]
    fn test_build_svg_contains_labels_and_cells() {
        let svg = SvgHeatmap::build_svg(&grid(2, 3), Granularity::Monthly);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Monthly Cohort Retention Heatmap"));
        assert!(svg.contains("Month 0"));
        assert!(svg.contains("2024-01"));
        assert_eq!(svg.matches("<rect").count(), 6);
        assert!(svg.contains("100.0%"));
    }

    #[test]
    fn test_build_svg_caps_cohorts_and_periods() {
        let svg = SvgHeatmap::build_svg(&grid(20, 20), Granularity::Daily);
        assert_eq!(svg.matches("<rect").count(), MAX_COHORTS * MAX_PERIODS);
    }

    #[test]
    fn test_render_writes_file_and_returns_url() {
        let dir = std::env::temp_dir().join("cohortlens-charts-test");
        std::fs::create_dir_all(&dir).unwrap();
        let renderer = SvgHeatmap::new(&dir, "/static/charts");
        let url = renderer
            .render_retention_heatmap(&grid(1, 1), Granularity::Weekly)
            .unwrap();
        assert!(url.starts_with("/static/charts/retention_heatmap_weekly_"));
        let filename = url.rsplit('/').next().unwrap();
        assert!(dir.join(filename).exists());
    }

    #[test]
    fn test_render_fails_into_error_not_panic() {
        let renderer = SvgHeatmap::new("/nonexistent/charts/dir", "/static/charts");
        assert!(renderer
            .render_retention_heatmap(&grid(1, 1), Granularity::Daily)
            .is_err());
    }

    #[test]
    fn test_color_ramp_endpoints() {
        assert_eq!(cell_colors(0.0).0, "#ffffcc");
        assert_eq!(cell_colors(1.0).0, "#f03b20");
        assert_eq!(cell_colors(1.0).1, "white");
    }
}
