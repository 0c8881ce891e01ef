use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

/// Latency log entry for one API request, written to the `lumina.timing`
/// target so it lands in timing.log / timing.jsonl only.
#[derive(Debug)]
pub struct RequestTimer {
    route: String,
    correlation_id: String,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl RequestTimer {
    pub fn start(route: &str, correlation_id: &str) -> Self {
        let timer = RequestTimer {
            route: route.to_string(),
            correlation_id: correlation_id.to_string(),
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        };
        info!(
            target: "lumina.timing",
            "event=request_received route={} correlation_id={} received_at={}",
            timer.route,
            timer.correlation_id,
            timer.started_at.to_rfc3339()
        );
        timer
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: "lumina.timing",
            "event=request_completed route={} correlation_id={} started_at={} response_sent_at={} duration_s={:.3} status={} detail={}",
            self.route,
            self.correlation_id,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

pub async fn log_llm_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: "lumina.timing",
        "event=llm_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let mut status = "success";
    let result = call().await;
    if result.is_err() {
        status = "error";
    }

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: "lumina.timing",
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status,
        metadata_text
    );

    result
}
