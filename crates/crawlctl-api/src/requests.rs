//! Request/response DTOs and the validation rules from §6.

use std::collections::BTreeMap;

use crawlctl_types::WebhookConfig;
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;

/// `crawler_config`'s only field the core cares about is `overlap_rate`;
/// everything else round-trips to the engine unexamined.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CrawlerConfig {
    #[serde(default)]
    pub overlap_rate: Option<f64>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CrawlerConfig {
    /// §9: "the source permits `overlap_rate` outside `[0,1]`; behavior
    /// undefined. Reject at schema validation" — enforced here rather than
    /// left to the engine.
    pub fn validate(&self) -> Result<(), ApiError> {
        if let Some(rate) = self.overlap_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ApiError::Validation(format!(
                    "overlap_rate must be in [0,1], got {rate}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CrawlRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub browser_config: Option<crawlctl_types::BrowserSpec>,
    #[serde(default)]
    pub crawler_config: Option<CrawlerConfig>,
    #[serde(default)]
    pub dispatcher: Option<String>,
}

impl CrawlRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.urls.is_empty() {
            return Err(ApiError::Validation("urls must be non-empty".to_string()));
        }
        for url in &self.urls {
            url::Url::parse(url).map_err(|e| ApiError::Validation(format!("invalid url {url}: {e}")))?;
        }
        if let Some(config) = &self.crawler_config {
            config.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub browser_config: Option<crawlctl_types::BrowserSpec>,
    #[serde(default)]
    pub crawler_config: Option<CrawlerConfig>,
    #[serde(default)]
    pub webhook_config: Option<WebhookConfig>,
}

impl JobRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.urls.is_empty() {
            return Err(ApiError::Validation("urls must be non-empty".to_string()));
        }
        for url in &self.urls {
            url::Url::parse(url).map_err(|e| ApiError::Validation(format!("invalid url {url}: {e}")))?;
        }
        if let Some(config) = &self.crawler_config {
            config.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatusFilter {
    All,
    Active,
    Completed,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineMetricFilter {
    Memory,
    Requests,
    Browsers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineWindow {
    FiveMinutes,
    FifteenMinutes,
    OneHour,
}

impl TimelineWindow {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        match raw {
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "1h" => Ok(Self::OneHour),
            other => Err(ApiError::Validation(format!(
                "window must be one of 5m, 15m, 1h, got {other}"
            ))),
        }
    }

    pub fn as_duration(self) -> std::time::Duration {
        match self {
            Self::FiveMinutes => std::time::Duration::from_secs(5 * 60),
            Self::FifteenMinutes => std::time::Duration::from_secs(15 * 60),
            Self::OneHour => std::time::Duration::from_secs(60 * 60),
        }
    }
}

/// Shared `?limit=` validation: `1 <= limit <= 1000`.
pub fn validate_limit(limit: usize) -> Result<usize, ApiError> {
    if (1..=1000).contains(&limit) {
        Ok(limit)
    } else {
        Err(ApiError::Validation(format!("limit must be in [1,1000], got {limit}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_rate_out_of_range_is_rejected() {
        let config = CrawlerConfig {
            overlap_rate: Some(1.5),
            extra: BTreeMap::new(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn overlap_rate_in_range_is_accepted() {
        let config = CrawlerConfig {
            overlap_rate: Some(0.5),
            extra: BTreeMap::new(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_urls_rejected() {
        let req = CrawlRequest::default();
        assert!(req.validate().is_err());
    }

    #[test]
    fn limit_bounds_enforced() {
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(1001).is_err());
        assert!(validate_limit(500).is_ok());
    }

    #[test]
    fn window_parses_known_values_only() {
        assert!(TimelineWindow::parse("5m").is_ok());
        assert!(TimelineWindow::parse("3m").is_err());
    }
}
