//! The `CrawlerEngine` seam (§1, §4.12): the core treats page rendering and
//! extraction as an opaque collaborator. What's here is the trait the
//! gateway calls through, plus a minimal HTTP-fetch engine sufficient to
//! exercise the full request path without depending on an actual headless
//! browser automation stack — swapping in a real one means implementing
//! this trait, nothing else in the crate changes.

use async_trait::async_trait;
use crawlctl_pool::BrowserInstance;
use crawlctl_types::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlVariant {
    Crawl,
    Html,
    Markdown,
    Screenshot,
    Pdf,
    ExecuteJs,
}

#[async_trait]
pub trait CrawlerEngine: Send + Sync {
    async fn run(&self, instance: &BrowserInstance, url: &str, variant: CrawlVariant) -> CoreResult<serde_json::Value>;
}

/// Fetches `url` over plain HTTP(S) and returns the response body, tagged
/// by which variant was requested. `Screenshot`/`Pdf`/`ExecuteJs` need
/// actual page rendering, which this engine deliberately doesn't attempt.
pub struct SimpleHttpCrawlerEngine {
    client: reqwest::Client,
}

impl SimpleHttpCrawlerEngine {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CrawlerEngine for SimpleHttpCrawlerEngine {
    async fn run(&self, instance: &BrowserInstance, url: &str, variant: CrawlVariant) -> CoreResult<serde_json::Value> {
        match variant {
            CrawlVariant::Screenshot | CrawlVariant::Pdf | CrawlVariant::ExecuteJs => {
                return Err(CoreError::EngineRunError(format!(
                    "active engine does not support {variant:?} rendering"
                )));
            }
            _ => {}
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CoreError::EngineRunError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| CoreError::EngineRunError(e.to_string()))?;

        let content = match variant {
            CrawlVariant::Markdown => html_to_markdown_stub(&body),
            _ => body,
        };

        Ok(serde_json::json!({
            "url": url,
            "status": status,
            "fingerprint": instance.fingerprint,
            "content": content,
        }))
    }
}

/// Placeholder markdown conversion: strips tags crudely. A real engine
/// would use a proper HTML-to-markdown conversion; that logic lives outside
/// this core crate's scope.
fn html_to_markdown_stub(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_stub_strips_tags() {
        let md = html_to_markdown_stub("<html><body><h1>Hi</h1> <p>there</p></body></html>");
        assert_eq!(md, "Hi there");
    }
}
