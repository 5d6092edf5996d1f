//! Key-observations collaborator — asks an OpenAI-compatible chat endpoint
//! for a handful of insights about a finished analysis. Strictly optional:
//! the analysis result is complete before this runs.

use cohortlens_core::config::InsightsConfig;
use cohortlens_core::{CohortError, CohortResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

pub struct InsightsClient {
    http: reqwest::Client,
    config: InsightsConfig,
}

impl InsightsClient {
    pub fn new(config: InsightsConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Enabled only when configured on and an API key is present.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.api_key.is_some()
    }

    /// Request 3-5 key observations for the serialized analysis result.
    pub async fn key_observations(
        &self,
        analysis: &serde_json::Value,
    ) -> CohortResult<Vec<String>> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(CohortError::Insights("API key not configured".to_string()));
        };

        let analysis_json = truncate_chars(
            &serde_json::to_string(analysis)?,
            self.config.max_prompt_chars,
        );
        let prompt = build_prompt(&analysis_json);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            max_tokens: 512,
            temperature: 0.7,
        };

        info!(model = %self.config.model, "requesting analysis insights");
        let response = self
            .http
            .post(self.config.api_url.as_str())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CohortError::Insights(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "insights endpoint returned an error");
            return Err(CohortError::Insights(format!(
                "insights endpoint returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CohortError::Insights(e.to_string()))?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        let observations = parse_bullets(content);
        info!(count = observations.len(), "insights received");
        Ok(observations)
    }
}

fn build_prompt(analysis_json: &str) -> String {
    format!(
        "You are a data analyst. Given the following cohort analysis results, \
         draw 3 to 5 key observations or insights (go to 5 only if the dataset \
         is sufficient). Be concise and focus on actionable findings. Do not \
         print anything else, just the points, one or two lines each. Here is \
         the data:\n{analysis_json}\nList the insights as bullet points."
    )
}

/// Truncate on a char boundary, marking the cut.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...(truncated)");
    out
}

fn parse_bullets(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim().trim_start_matches(['-', '•', '*', ' ']).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_api_key() {
        let client = InsightsClient::new(InsightsConfig::default());
        assert!(!client.is_enabled());

        let client = InsightsClient::new(InsightsConfig {
            api_key: Some("k".to_string()),
            ..InsightsConfig::default()
        });
        assert!(client.is_enabled());

        let client = InsightsClient::new(InsightsConfig {
            api_key: Some("k".to_string()),
            enabled: false,
            ..InsightsConfig::default()
        });
        assert!(!client.is_enabled());
    }

    #[test]
    fn test_truncation_marks_the_cut() {
        let out = truncate_chars("abcdefgh", 4);
        assert_eq!(out, "abcd...(truncated)");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_parse_bullets_strips_markers_and_blanks() {
        let content = "- first insight\n\n• second insight\n  * third insight  \n";
        assert_eq!(
            parse_bullets(content),
            vec!["first insight", "second insight", "third insight"]
        );
    }
}
