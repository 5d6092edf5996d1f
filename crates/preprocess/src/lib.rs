//! Table preprocessing applied before cohort analysis — outlier handling,
//! null imputation and heuristic type coercion, driven by an explicit
//! options structure resolved once at the API boundary.

mod stats;

use cohortlens_core::types::{
    CategoricalImpute, NullHandling, NumericalImpute, OutlierPolicy, PreprocessingOptions,
};
use cohortlens_core::{Cell, Frame};
use tracing::info;

use stats::{mean, median, quantile, std_dev};

/// Z-score threshold beyond which a numeric value counts as an outlier.
const OUTLIER_Z_THRESHOLD: f64 = 3.0;

/// Percentile used when capping outliers.
const CAP_QUANTILE: f64 = 0.99;

/// Apply the configured preprocessing steps in order: outliers, null
/// handling, type conversion. The frame is a working copy owned by the
/// caller of the analysis, never the original input.
pub fn preprocess_frame(frame: &mut Frame, options: &PreprocessingOptions) {
    match options.outliers {
        Some(OutlierPolicy::Remove) => remove_outliers(frame, OUTLIER_Z_THRESHOLD),
        Some(OutlierPolicy::Cap) => cap_outliers(frame, CAP_QUANTILE),
        None => {}
    }
    if let Some(null_handling) = &options.null_handling {
        impute_nulls(frame, null_handling);
    }
    if options.type_conversion {
        convert_types(frame);
    }
}

/// Columns whose non-null cells are all numeric.
fn numeric_columns(frame: &Frame) -> Vec<usize> {
    (0..frame.columns().len())
        .filter(|&idx| {
            let mut any = false;
            for cell in frame.column(idx) {
                match cell {
                    Cell::Int(_) | Cell::Float(_) => any = true,
                    Cell::Null => {}
                    Cell::Str(_) => return false,
                }
            }
            any
        })
        .collect()
}

fn categorical_columns(frame: &Frame) -> Vec<usize> {
    let numeric = numeric_columns(frame);
    (0..frame.columns().len())
        .filter(|idx| !numeric.contains(idx))
        .filter(|&idx| frame.column(idx).any(|c| matches!(c, Cell::Str(_))))
        .collect()
}

/// Drop rows holding a numeric value more than `z_thresh` standard
/// deviations from its column mean. Nulls survive; columns with degenerate
/// spread are skipped.
pub fn remove_outliers(frame: &mut Frame, z_thresh: f64) {
    let columns = numeric_columns(frame);
    let mut bounds: Vec<(usize, f64, f64)> = Vec::new();
    for &idx in &columns {
        let values: Vec<f64> = frame.column(idx).filter_map(Cell::as_f64).collect();
        let m = mean(&values);
        let s = std_dev(&values);
        if s.is_finite() && s > 0.0 {
            bounds.push((idx, m, s));
        }
    }

    let before = frame.len();
    frame.retain_rows(|row| {
        bounds.iter().all(|&(idx, m, s)| match row[idx].as_f64() {
            Some(v) => ((v - m) / s).abs() < z_thresh,
            None => true,
        })
    });
    info!(
        removed = before - frame.len(),
        columns = columns.len(),
        "outlier rows removed"
    );
}

/// Clamp numeric values at the given quantile per column.
pub fn cap_outliers(frame: &mut Frame, q: f64) {
    let columns = numeric_columns(frame);
    for idx in columns {
        let values: Vec<f64> = frame.column(idx).filter_map(Cell::as_f64).collect();
        let Some(cap) = quantile(&values, q) else {
            continue;
        };
        for row in frame.rows_mut() {
            if let Some(v) = row[idx].as_f64() {
                if v > cap {
                    row[idx] = Cell::Float(cap);
                }
            }
        }
        info!(column = idx, cap, "numeric column capped");
    }
}

/// Fill nulls in categorical then numerical columns per the configured
/// strategies.
pub fn impute_nulls(frame: &mut Frame, options: &NullHandling) {
    for idx in categorical_columns(frame) {
        let fill = match options.categorical {
            CategoricalImpute::MostFrequent => most_frequent(frame, idx),
            CategoricalImpute::Constant => None,
        }
        .unwrap_or_else(|| "Unknown".to_string());
        let mut filled = 0usize;
        for row in frame.rows_mut() {
            if row[idx].is_null() {
                row[idx] = Cell::Str(fill.clone());
                filled += 1;
            }
        }
        if filled > 0 {
            info!(column = idx, filled, strategy = ?options.categorical, "categorical nulls imputed");
        }
    }

    for idx in numeric_columns(frame) {
        let values: Vec<f64> = frame.column(idx).filter_map(Cell::as_f64).collect();
        let fill = match options.numerical {
            NumericalImpute::Mean => mean(&values),
            NumericalImpute::Median => median(&values).unwrap_or(0.0),
            NumericalImpute::Zero => 0.0,
        };
        let mut filled = 0usize;
        for row in frame.rows_mut() {
            if row[idx].is_null() {
                row[idx] = Cell::Float(fill);
                filled += 1;
            }
        }
        if filled > 0 {
            info!(column = idx, filled, strategy = ?options.numerical, "numerical nulls imputed");
        }
    }
}

fn most_frequent(frame: &Frame, idx: usize) -> Option<String> {
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for cell in frame.column(idx) {
        if let Some(s) = cell.as_str() {
            *counts.entry(s).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(value, _)| value.to_string())
}

/// Heuristic column coercion: columns whose name mentions a date are
/// normalized to ISO strings when every non-null value parses; remaining
/// string columns become numeric when every non-null value parses. The
/// conversion is all-or-nothing per column.
pub fn convert_types(frame: &mut Frame) {
    let column_names: Vec<String> = frame.columns().to_vec();
    for (idx, name) in column_names.iter().enumerate() {
        let lower = name.to_lowercase();
        let date_like = ["date", "time", "timestamp"]
            .iter()
            .any(|token| lower.contains(token));

        if date_like && try_convert_dates(frame, idx) {
            info!(column = %name, "column converted to datetime");
            continue;
        }
        if try_convert_numeric(frame, idx) {
            info!(column = %name, "column converted to numeric");
        }
    }
}

fn try_convert_dates(frame: &mut Frame, idx: usize) -> bool {
    let mut converted: Vec<Option<String>> = Vec::with_capacity(frame.len());
    for cell in frame.column(idx) {
        match cell {
            Cell::Null => converted.push(None),
            other => match other.as_timestamp() {
                Some(ts) => converted.push(Some(ts.format("%Y-%m-%dT%H:%M:%S").to_string())),
                None => return false,
            },
        }
    }
    for (row, value) in frame.rows_mut().iter_mut().zip(converted) {
        if let Some(v) = value {
            row[idx] = Cell::Str(v);
        }
    }
    true
}

fn try_convert_numeric(frame: &mut Frame, idx: usize) -> bool {
    let mut converted: Vec<Option<f64>> = Vec::with_capacity(frame.len());
    let mut any_string = false;
    for cell in frame.column(idx) {
        match cell {
            Cell::Null => converted.push(None),
            Cell::Int(_) | Cell::Float(_) => converted.push(None),
            Cell::Str(_) => {
                any_string = true;
                match cell.as_f64() {
                    Some(v) => converted.push(Some(v)),
                    None => return false,
                }
            }
        }
    }
    if !any_string {
        return false;
    }
    for (row, value) in frame.rows_mut().iter_mut().zip(converted) {
        if let Some(v) = value {
            row[idx] = Cell::Float(v);
        }
    }
    true
}
