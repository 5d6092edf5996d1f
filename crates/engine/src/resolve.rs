//! Column resolution — maps caller-supplied column names onto the canonical
//! roles the rest of the pipeline consumes.

use chrono::NaiveDateTime;
use cohortlens_core::{Cell, CohortError, CohortResult, Frame};
use tracing::error;

/// One input row with its semantic fields resolved.
#[derive(Debug, Clone)]
pub struct CanonicalRow {
    pub customer_id: String,
    /// Event timestamp; `None` marks an unparseable date.
    pub invoice_date: Option<NaiveDateTime>,
    /// Explicit cohort timestamp; `None` when the cohort column and event
    /// column are the same physical column.
    pub cohort_date: Option<NaiveDateTime>,
    /// Raw revenue value, numeric-coerced; `None` when absent or not
    /// coercible.
    pub revenue: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CanonicalTable {
    pub rows: Vec<CanonicalRow>,
    /// Cohort column and event column were the same physical column, so the
    /// cohort is derived from each user's earliest activity.
    pub shared_date_column: bool,
    /// A revenue column was requested and exists in the table.
    pub revenue_present: bool,
}

/// Resolve the three (or four, with revenue) column roles.
///
/// When the cohort column equals the event column both map onto a single
/// invoice date, deduplicating the rename. Otherwise the cohort column is
/// kept separately and the invoice date is the event date.
pub fn resolve_columns(
    frame: &Frame,
    user_id_col: &str,
    cohort_col: &str,
    event_col: &str,
    revenue_col: Option<&str>,
) -> CohortResult<CanonicalTable> {
    if frame.is_empty() {
        error!("input table is empty");
        return Err(CohortError::Validation("Input table is empty".to_string()));
    }

    let user_idx = frame.column_index(user_id_col).ok_or_else(|| {
        error!(column = user_id_col, "user id column not found");
        CohortError::Validation(format!("User ID column '{user_id_col}' not found in data"))
    })?;
    let cohort_idx = frame.column_index(cohort_col).ok_or_else(|| {
        error!(column = cohort_col, "cohort grouping column not found");
        CohortError::Validation(format!(
            "Cohort grouping column '{cohort_col}' not found in data"
        ))
    })?;
    let event_idx = frame.column_index(event_col).ok_or_else(|| {
        error!(column = event_col, "event column not found");
        CohortError::Validation(format!("Event column '{event_col}' not found in data"))
    })?;

    let shared_date_column = cohort_col == event_col;
    let revenue_idx = revenue_col.and_then(|c| frame.column_index(c));
    let revenue_present = revenue_idx.is_some();

    let mut rows = Vec::with_capacity(frame.len());
    for raw in frame.rows() {
        let customer = &raw[user_idx];
        if customer.is_null() {
            continue;
        }
        let customer_id = customer.display();
        if customer_id.is_empty() {
            continue;
        }

        // Unparseable individual values become the null-date marker rather
        // than failing the whole batch.
        let invoice_date = raw[event_idx].as_timestamp();
        let cohort_date = if shared_date_column {
            None
        } else {
            raw[cohort_idx].as_timestamp()
        };
        let revenue = revenue_idx.and_then(|i| raw[i].as_f64());

        rows.push(CanonicalRow {
            customer_id,
            invoice_date,
            cohort_date,
            revenue,
        });
    }

    Ok(CanonicalTable {
        rows,
        shared_date_column,
        revenue_present,
    })
}

/// Whole-table revenue total over coercible values, computed on the raw
/// frame before any cleaning.
pub fn total_revenue(frame: &Frame, revenue_col: Option<&str>) -> Option<f64> {
    let idx = revenue_col.and_then(|c| frame.column_index(c))?;
    Some(frame.column(idx).filter_map(Cell::as_f64).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        let mut f = Frame::new(vec![
            "customer".to_string(),
            "signup".to_string(),
            "purchased_at".to_string(),
            "amount".to_string(),
        ]);
        f.push_row(vec![
            Cell::Str("a".into()),
            Cell::Str("2024-01-01".into()),
            Cell::Str("2024-01-05".into()),
            Cell::Str("10.5".into()),
        ])
        .unwrap();
        f.push_row(vec![
            Cell::Str("b".into()),
            Cell::Str("2024-02-01".into()),
            Cell::Str("garbage".into()),
            Cell::Str("oops".into()),
        ])
        .unwrap();
        f
    }

    #[test]
    fn test_missing_column_fails() {
        let frame = sample_frame();
        let err =
            resolve_columns(&frame, "nope", "signup", "purchased_at", None).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_empty_frame_fails() {
        let frame = Frame::new(vec!["customer".to_string()]);
        assert!(resolve_columns(&frame, "customer", "customer", "customer", None).is_err());
    }

    #[test]
    fn test_separate_cohort_and_event_columns() {
        let frame = sample_frame();
        let table =
            resolve_columns(&frame, "customer", "signup", "purchased_at", Some("amount"))
                .unwrap();
        assert!(!table.shared_date_column);
        assert!(table.revenue_present);
        assert_eq!(table.rows.len(), 2);
        assert!(table.rows[0].cohort_date.is_some());
        assert!(table.rows[0].invoice_date.is_some());
        assert_eq!(table.rows[0].revenue, Some(10.5));
        // Unparseable date and revenue coerce to the null markers.
        assert!(table.rows[1].invoice_date.is_none());
        assert!(table.rows[1].revenue.is_none());
    }

    #[test]
    fn test_shared_column_maps_once() {
        let frame = sample_frame();
        let table = resolve_columns(
            &frame,
            "customer",
            "purchased_at",
            "purchased_at",
            None,
        )
        .unwrap();
        assert!(table.shared_date_column);
        assert!(table.rows.iter().all(|r| r.cohort_date.is_none()));
    }

    #[test]
    fn test_null_customer_rows_skipped() {
        let mut frame = Frame::new(vec!["customer".to_string(), "d".to_string()]);
        frame
            .push_row(vec![Cell::Null, Cell::Str("2024-01-01".into())])
            .unwrap();
        frame
            .push_row(vec![Cell::Str("a".into()), Cell::Str("2024-01-01".into())])
            .unwrap();
        let table = resolve_columns(&frame, "customer", "d", "d", None).unwrap();
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_total_revenue_ignores_non_numeric() {
        let frame = sample_frame();
        let total = total_revenue(&frame, Some("amount")).unwrap();
        assert!((total - 10.5).abs() < 1e-9);
        assert!(total_revenue(&frame, Some("missing")).is_none());
    }
}
