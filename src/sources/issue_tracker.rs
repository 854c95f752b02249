//! Issue tracker source
//!
//! Polls open issues from a GitHub-compatible REST API. Pull requests, which
//! the issues endpoint also returns, are skipped.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::{InputItem, InputSource};
use crate::config::IssueTrackerConfig;
use crate::errors::{SourceError, SourceResult};
use crate::job_scheduling::JobPriority;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

pub struct IssueTrackerSource {
    name: String,
    api_base: String,
    repository: String,
    labels: Vec<String>,
    ack_comment: Option<String>,
    client: reqwest::Client,
}

impl IssueTrackerSource {
    /// Build a source, reading the API token from `token_env` when set
    pub fn new(config: &IssueTrackerConfig) -> SourceResult<Self> {
        if config.repository.split('/').filter(|part| !part.is_empty()).count() != 2 {
            return Err(SourceError::invalid_config(
                &config.name,
                format!("repository '{}' must be 'owner/repo'", config.repository),
            ));
        }

        let token = match &config.token_env {
            Some(var) => match std::env::var(var) {
                Ok(token) => Some(token),
                Err(_) => {
                    warn!(
                        "Token variable {} for source '{}' is not set, polling anonymously",
                        var, config.name
                    );
                    None
                }
            },
            None => None,
        };

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("cronloop"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                SourceError::invalid_config(&config.name, format!("invalid token: {e}"))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            name: config.name.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            repository: config.repository.clone(),
            labels: config.labels.clone(),
            ack_comment: config.ack_comment.clone(),
            client,
        })
    }

    fn issues_url(&self) -> String {
        format!("{}/repos/{}/issues", self.api_base, self.repository)
    }

    async fn check_status(&self, response: reqwest::Response) -> SourceResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SourceError::Status {
            source_name: self.name.clone(),
            status: status.as_u16(),
            message,
        })
    }

    fn item_from_issue(&self, issue: Issue) -> InputItem {
        let labels: Vec<String> = issue.labels.into_iter().map(|label| label.name).collect();
        let mut item = InputItem::new(
            &self.name,
            issue.number.to_string(),
            priority_from_labels(&labels),
            issue.title,
            issue.body.unwrap_or_default(),
        )
        .with_metadata("number", issue.number)
        .with_metadata("labels", labels);

        if let Some(url) = issue.html_url {
            item = item.with_metadata("url", url);
        }
        item
    }
}

/// Priority from a `priority:<level>` label, else a bare `<level>` label
pub(crate) fn priority_from_labels(labels: &[String]) -> JobPriority {
    let prefixed = labels.iter().find_map(|label| {
        label
            .split_once(':')
            .filter(|(key, _)| key.trim().eq_ignore_ascii_case("priority"))
            .and_then(|(_, level)| JobPriority::from_str(level.trim()).ok())
    });

    prefixed
        .or_else(|| {
            labels
                .iter()
                .find_map(|label| JobPriority::from_str(label.trim()).ok())
        })
        .unwrap_or_default()
}

#[async_trait]
impl InputSource for IssueTrackerSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> SourceResult<Vec<InputItem>> {
        let mut request = self
            .client
            .get(self.issues_url())
            .query(&[("state", "open"), ("per_page", "100")]);
        if !self.labels.is_empty() {
            request = request.query(&[("labels", self.labels.join(","))]);
        }

        let response = self.check_status(request.send().await?).await?;
        let issues: Vec<Issue> = response
            .json()
            .await
            .map_err(|e| SourceError::parse(&self.name, e.to_string()))?;

        let items: Vec<InputItem> = issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(|issue| self.item_from_issue(issue))
            .collect();

        debug!(
            "Issue tracker '{}' returned {} open issues for {}",
            self.name,
            items.len(),
            self.repository
        );
        Ok(items)
    }

    async fn acknowledge(&self, item_id: &str) -> SourceResult<()> {
        let Some(comment) = &self.ack_comment else {
            return Ok(());
        };

        let url = format!("{}/{}/comments", self.issues_url(), item_id);
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "body": comment }))
            .send()
            .await?;
        self.check_status(response).await?;

        info!("Acknowledged issue #{} on {}", item_id, self.repository);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_priority_from_labels() {
        assert_eq!(priority_from_labels(&labels(&["bug", "priority:high"])), JobPriority::High);
        assert_eq!(priority_from_labels(&labels(&["Priority: Urgent"])), JobPriority::Urgent);
        assert_eq!(priority_from_labels(&labels(&["low", "docs"])), JobPriority::Low);
        assert_eq!(priority_from_labels(&labels(&["high", "priority:low"])), JobPriority::Low);
        assert_eq!(priority_from_labels(&labels(&["enhancement"])), JobPriority::Medium);
        assert_eq!(priority_from_labels(&[]), JobPriority::Medium);
    }

    #[test]
    fn test_rejects_malformed_repository() {
        let config = IssueTrackerConfig {
            name: "github".to_string(),
            api_base: "https://api.github.com".to_string(),
            repository: "just-a-name".to_string(),
            token_env: None,
            labels: Vec::new(),
            ack_comment: None,
        };
        assert!(matches!(
            IssueTrackerSource::new(&config),
            Err(SourceError::InvalidConfig { .. })
        ));
    }
}
