use serde::{Deserialize, Serialize};

use crate::error::{CohortError, CohortResult};

/// Time-bucket unit used for both cohort formation and activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Granularity {
    pub const ALLOWED: [&'static str; 5] =
        ["daily", "weekly", "monthly", "quarterly", "yearly"];

    /// Parse a caller-supplied interval token, rejecting anything outside
    /// the supported set with an error that names the alternatives.
    pub fn parse(token: &str) -> CohortResult<Self> {
        match token {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            other => Err(CohortError::Validation(format!(
                "Interval must be one of {:?}, got '{other}'",
                Self::ALLOWED
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which metric family the caller wants out of the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMetric {
    Retention,
    Revenue,
}

/// Outlier treatment applied to numeric columns before analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierPolicy {
    /// Drop rows with any numeric value beyond the z-score threshold.
    Remove,
    /// Clamp numeric values at the 99th percentile.
    Cap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalImpute {
    MostFrequent,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericalImpute {
    Mean,
    Median,
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullHandling {
    #[serde(default = "default_categorical_impute")]
    pub categorical: CategoricalImpute,
    #[serde(default = "default_numerical_impute")]
    pub numerical: NumericalImpute,
}

fn default_categorical_impute() -> CategoricalImpute {
    CategoricalImpute::MostFrequent
}

fn default_numerical_impute() -> NumericalImpute {
    NumericalImpute::Mean
}

impl Default for NullHandling {
    fn default() -> Self {
        Self {
            categorical: default_categorical_impute(),
            numerical: default_numerical_impute(),
        }
    }
}

/// Preprocessing applied to the raw table before it reaches the cohort
/// engine. Every field is statically known; absent fields mean "skip".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingOptions {
    pub outliers: Option<OutlierPolicy>,
    pub null_handling: Option<NullHandling>,
    pub type_conversion: bool,
}

/// Analysis request accepted by the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub filename: String,
    pub user_id_col: String,
    pub cohort_col: String,
    pub event_col: String,
    #[serde(default)]
    pub revenue_col: Option<String>,
    pub metric: AnalysisMetric,
    /// Interval token; validated against [`Granularity::ALLOWED`].
    pub interval: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// Optional column subset; role columns are always retained.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub preprocessing: Option<PreprocessingOptions>,
    #[serde(default = "default_llm_insights")]
    pub llm_insights: bool,
}

fn default_llm_insights() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_parse_accepts_all_tokens() {
        for token in Granularity::ALLOWED {
            assert_eq!(Granularity::parse(token).unwrap().as_str(), token);
        }
    }

    #[test]
    fn test_granularity_parse_rejects_unknown_token() {
        let err = Granularity::parse("hourly").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("hourly"));
        for token in Granularity::ALLOWED {
            assert!(msg.contains(token), "error should name '{token}': {msg}");
        }
    }

    #[test]
    fn test_preprocessing_options_deserialize_defaults() {
        let opts: PreprocessingOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.outliers.is_none());
        assert!(opts.null_handling.is_none());
        assert!(!opts.type_conversion);
    }

    #[test]
    fn test_analysis_request_minimal_payload() {
        let req: AnalysisRequest = serde_json::from_value(serde_json::json!({
            "filename": "orders.csv",
            "user_id_col": "customer_id",
            "cohort_col": "order_date",
            "event_col": "order_date",
            "metric": "retention",
            "interval": "monthly"
        }))
        .unwrap();
        assert!(req.llm_insights);
        assert!(req.revenue_col.is_none());
    }
}
