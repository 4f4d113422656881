use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use super::{AcquireError, BalanceSource};
use crate::config::SourceConfig;

/// Scrapes the campus payment portal page for the remaining credit.
pub struct PortalSource {
    http: Client,
    url: String,
    pattern: Regex,
}

impl PortalSource {
    pub fn new(cfg: &SourceConfig, account_id: &str) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: resolve_url(cfg, account_id),
            pattern: Regex::new(&cfg.pattern)?,
        })
    }
}

/// Use the override verbatim when present; otherwise append the account to
/// the portal's query string.
fn resolve_url(cfg: &SourceConfig, account_id: &str) -> String {
    match &cfg.url {
        Some(url) => url.clone(),
        None => format!("{}?{}&roomid={}", cfg.base_url, cfg.base_query, account_id),
    }
}

/// Pull the remaining-credit figure out of the page body. The first match
/// wins; its first capture group is the number.
fn extract_kwh(pattern: &Regex, body: &str) -> Result<f64, AcquireError> {
    let captures = pattern.captures(body).ok_or_else(|| AcquireError::Unmatched {
        snippet: body.chars().take(100).collect(),
    })?;

    let text = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    text.parse::<f64>().map_err(|_| AcquireError::Malformed {
        text: text.to_string(),
    })
}

#[async_trait]
impl BalanceSource for PortalSource {
    async fn fetch_kwh(&self) -> Result<f64, AcquireError> {
        let body = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        extract_kwh(&self.pattern, &body)
    }
}
