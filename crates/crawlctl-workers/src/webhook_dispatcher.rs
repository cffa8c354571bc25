//! Delivers job-completion webhooks with bounded retries (§4.11).
//!
//! Delivery is at-least-once: a webhook can be sent after `markCompleted`
//! has already persisted the terminal job state, so a crash between the two
//! can result in a delivery racing (or losing to) a reader who polled the
//! job endpoint directly. Receivers are expected to treat webhook bodies as
//! idempotent notifications, not a transactional handoff.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use crawlctl_types::{Job, JobKind, JobStatus};
use rand::Rng;
use serde::Serialize;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const BASE_DELAYS_SECS: [u64; 5] = [1, 2, 4, 8, 16];
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const JITTER_FRACTION: f64 = 0.2;
const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct WebhookPayload {
    task_id: String,
    task_type: &'static str,
    status: &'static str,
    timestamp: String,
    urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn task_type(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Crawl => "crawl",
        JobKind::LlmExtract => "llm_extraction",
    }
}

pub struct WebhookDispatcher {
    client: reqwest::Client,
    default_headers: BTreeMap<String, String>,
    max_attempts: u32,
    max_delay: Duration,
}

impl WebhookDispatcher {
    pub fn new(default_headers: BTreeMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_headers,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Delivers the terminal-state webhook for `job`, if it has one
    /// configured. Never returns an error; all outcomes are logged.
    pub async fn deliver(&self, job: &Job) {
        let Some(config) = &job.webhook_config else {
            return;
        };
        if !job.status.is_terminal() {
            tracing::warn!(job_id = %job.id, "deliver called on non-terminal job, skipping");
            return;
        }

        let payload = WebhookPayload {
            task_id: job.id.clone(),
            task_type: task_type(job.kind),
            status: if job.status == JobStatus::Completed { "completed" } else { "failed" },
            timestamp: Utc::now().to_rfc3339(),
            urls: job.urls.clone(),
            data: if config.webhook_data_in_payload && job.status == JobStatus::Completed {
                job.result.clone()
            } else {
                None
            },
            error: if job.status == JobStatus::Failed {
                job.error.clone()
            } else {
                None
            },
        };

        let mut headers = self.default_headers.clone();
        for (k, v) in &config.webhook_headers {
            headers.insert(k.clone(), v.clone());
        }

        for attempt in 1..=self.max_attempts {
            match self.attempt_once(&config.webhook_url, &payload, &headers).await {
                Outcome::Success => {
                    tracing::info!(job_id = %job.id, attempt, "webhook delivered");
                    return;
                }
                Outcome::TerminalFailure(status) => {
                    tracing::warn!(job_id = %job.id, %status, "webhook rejected, not retrying");
                    return;
                }
                Outcome::Retryable(reason) => {
                    tracing::debug!(job_id = %job.id, attempt, %reason, "webhook attempt failed, may retry");
                    if attempt == self.max_attempts {
                        tracing::warn!(job_id = %job.id, attempts = attempt, "webhook delivery exhausted retries");
                        return;
                    }
                    tokio::time::sleep(self.delay_for(attempt)).await;
                }
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).saturating_sub(1).min(BASE_DELAYS_SECS.len() - 1);
        let base = Duration::from_secs(BASE_DELAYS_SECS[idx]).min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        let scaled = base.as_secs_f64() * (1.0 + jitter);
        Duration::from_secs_f64(scaled.max(0.0))
    }

    async fn attempt_once(
        &self,
        url: &str,
        payload: &WebhookPayload,
        headers: &BTreeMap<String, String>,
    ) -> Outcome {
        let mut request = self.client.post(url).timeout(PER_ATTEMPT_TIMEOUT).json(payload);
        for (k, v) in headers {
            request = request.header(k, v);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    Outcome::Success
                } else if status.is_client_error() && status.as_u16() != 429 {
                    Outcome::TerminalFailure(status.as_u16())
                } else {
                    Outcome::Retryable(format!("http {status}"))
                }
            }
            Err(err) => Outcome::Retryable(err.to_string()),
        }
    }
}

enum Outcome {
    Success,
    TerminalFailure(u16),
    Retryable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completed_job(webhook_url: String) -> Job {
        Job {
            id: "job-1".to_string(),
            kind: JobKind::Crawl,
            status: JobStatus::Completed,
            created_at: Utc::now(),
            finished_at: Some(Utc::now()),
            urls: vec!["https://example.com".to_string()],
            result: Some(serde_json::json!({"pages": 1})),
            error: None,
            webhook_config: Some(crawlctl_types::WebhookConfig {
                webhook_url,
                webhook_data_in_payload: true,
                webhook_headers: BTreeMap::new(),
            }),
        }
    }

    #[tokio::test]
    async fn successful_delivery_posts_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = WebhookDispatcher::new(BTreeMap::new());
        let job = completed_job(format!("{}/hook", server.uri()));
        dispatcher.deliver(&job).await;
    }

    #[tokio::test]
    async fn four_oh_four_does_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = WebhookDispatcher::new(BTreeMap::new());
        let job = completed_job(format!("{}/hook", server.uri()));
        dispatcher.deliver(&job).await;
    }

    #[tokio::test]
    async fn non_terminal_job_is_not_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/hook")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let dispatcher = WebhookDispatcher::new(BTreeMap::new());
        let mut job = completed_job(format!("{}/hook", server.uri()));
        job.status = JobStatus::Running;
        dispatcher.deliver(&job).await;
    }
}
