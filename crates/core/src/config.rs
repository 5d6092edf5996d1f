use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `COHORTLENS__` and per-field serde defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub insights: InsightsConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Local directories for uploads, rendered charts and exported result
/// tables. Created by the binary at startup, never as a side effect of
/// constructing a service.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_charts_dir")]
    pub charts_dir: String,
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
}

/// LLM key-observations collaborator. Disabled unless an API key is
/// configured; analysis never depends on it.
#[derive(Debug, Clone, Deserialize)]
pub struct InsightsConfig {
    #[serde(default = "default_insights_url")]
    pub api_url: String,
    #[serde(default = "default_insights_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_insights_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

fn default_charts_dir() -> String {
    "static/charts".to_string()
}

fn default_export_dir() -> String {
    "exports".to_string()
}

fn default_insights_url() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

fn default_insights_model() -> String {
    "llama-3.1-8b-instant".to_string()
}

fn default_max_prompt_chars() -> usize {
    23_500
}

fn default_insights_enabled() -> bool {
    true
}

fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            charts_dir: default_charts_dir(),
            export_dir: default_export_dir(),
        }
    }
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            api_url: default_insights_url(),
            model: default_insights_model(),
            api_key: None,
            max_prompt_chars: default_max_prompt_chars(),
            enabled: default_insights_enabled(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            storage: StorageConfig::default(),
            insights: InsightsConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("COHORTLENS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
