use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::MonitoringConfig;

/// The rolling window (seconds) over which error rate, response time, and
/// failure-rate thresholds are evaluated. Not independently configurable in
/// the functional spec -- `monitoring.thresholds` names the *levels*, this
/// is the evaluation window they're measured over.
const WINDOW_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
  ErrorRate,
  ResponseTime,
  AuthFailureRate,
  RateLimitHitRate,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
  pub kind: AlertKind,
  pub message: String,
  pub value: f64,
  pub threshold: f64,
  pub at: chrono::DateTime<chrono::Utc>,
}

/// Dispatch target for a fired alert. Grounded on the reference's
/// multi-sink dispatch pattern (log + outbound webhook); each handler is
/// tried in registration order and a failure in one must not prevent the
/// rest from running (§4.9).
#[async_trait]
pub trait AlertHandler: Send + Sync {
  async fn handle(&self, alert: &Alert);
}

pub struct LogAlertHandler;

#[async_trait]
impl AlertHandler for LogAlertHandler {
  async fn handle(&self, alert: &Alert) {
    tracing::warn!(
      kind = ?alert.kind,
      value = alert.value,
      threshold = alert.threshold,
      "{}",
      alert.message
    );
  }
}

/// POSTs the alert as JSON via `reqwest`, matching the reference's own use
/// of `reqwest` for outbound HTTP. `SlackAlertHandler` (incoming webhooks
/// are plain JSON POSTs) is a thin wrapper over the same mechanism with a
/// `text` field Slack expects.
pub struct WebhookAlertHandler {
  client: reqwest::Client,
  url: String,
}

impl WebhookAlertHandler {
  pub fn new(url: impl Into<String>) -> Self {
    return Self {
      client: reqwest::Client::new(),
      url: url.into(),
    };
  }
}

#[async_trait]
impl AlertHandler for WebhookAlertHandler {
  async fn handle(&self, alert: &Alert) {
    if let Err(e) = self.client.post(&self.url).json(alert).send().await {
      tracing::warn!(error = %e, "webhook alert handler failed");
    }
  }
}

pub struct SlackAlertHandler {
  inner: WebhookAlertHandler,
}

impl SlackAlertHandler {
  pub fn new(webhook_url: impl Into<String>) -> Self {
    return Self {
      inner: WebhookAlertHandler::new(webhook_url),
    };
  }
}

#[async_trait]
impl AlertHandler for SlackAlertHandler {
  async fn handle(&self, alert: &Alert) {
    let payload = serde_json::json!({ "text": format!("[{:?}] {}", alert.kind, alert.message) });
    let response = self.inner.client.post(&self.inner.url).json(&payload).send().await;
    if let Err(e) = response {
      tracing::warn!(error = %e, "slack alert handler failed");
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
  Healthy,
  Degraded,
  Critical,
}

impl HealthStatus {
  pub fn from_score(score: i32) -> Self {
    return match score {
      80..=100 => Self::Healthy,
      50..=79 => Self::Degraded,
      _ => Self::Critical,
    };
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
  pub score: i32,
  pub status: HealthStatus,
  pub total_requests: u64,
  pub total_errors: u64,
  pub auth_failures: u64,
  pub rate_limit_hits: u64,
  pub avg_response_time_ms: f64,
}

#[derive(Default)]
struct Counters {
  total_requests: u64,
  total_errors: u64,
  status_counts: HashMap<u16, u64>,
  auth_failures: u64,
  rate_limit_hits: u64,
  /// `(timestamp, status, duration_ms)` for requests within the rolling
  /// window; pruned on every record so aggregates stay O(window) not
  /// O(lifetime).
  window: VecDeque<(i64, u16, u64)>,
  recent_alerts: VecDeque<i64>,
}

/// Aggregated counters, response-time stats, alerts, health score, and
/// export (§4.9). Counters are updated behind a single lock -- contention
/// is acceptable here since each update is O(1) amortized (the window
/// prune is bounded by how many entries just expired).
pub struct Monitor {
  config: MonitoringConfig,
  counters: Mutex<Counters>,
  handlers: Vec<Box<dyn AlertHandler>>,
}

impl Monitor {
  pub fn new(config: MonitoringConfig, handlers: Vec<Box<dyn AlertHandler>>) -> Self {
    return Self {
      config,
      counters: Mutex::new(Counters::default()),
      handlers,
    };
  }

  pub fn enabled(&self) -> bool {
    return self.config.enabled;
  }

  pub fn record_request(&self) {
    self.counters.lock().total_requests += 1;
  }

  pub async fn record_response(&self, status: u16, duration_ms: u64, _bytes: usize) {
    let now = chrono::Utc::now().timestamp();
    let alerts = {
      let mut counters = self.counters.lock();
      *counters.status_counts.entry(status).or_insert(0) += 1;
      if status >= 400 {
        counters.total_errors += 1;
      }
      counters.window.push_back((now, status, duration_ms));
      prune_window(&mut counters.window, now);
      self.evaluate_alerts(&mut counters, now)
    };
    self.dispatch(alerts).await;
  }

  pub async fn record_error(&self, message: &str, context: &str) {
    tracing::error!(context, "{message}");
    self.counters.lock().total_errors += 1;
  }

  pub async fn record_security_event(&self, kind: &str, context: &str) {
    tracing::warn!(kind, context, "security event");
    let now = chrono::Utc::now().timestamp();
    let alerts = {
      let mut counters = self.counters.lock();
      match kind {
        "auth_failure" => counters.auth_failures += 1,
        "rate_limit" => counters.rate_limit_hits += 1,
        _ => {}
      }
      self.evaluate_alerts(&mut counters, now)
    };
    self.dispatch(alerts).await;
  }

  /// Dispatches each fired alert to every configured handler in
  /// registration order; one handler's failure must not stop the rest
  /// (`AlertHandler::handle` itself never returns an error -- failures are
  /// swallowed and logged inside each handler so a panic-free loop here is
  /// enough to guarantee isolation).
  async fn dispatch(&self, alerts: Vec<Alert>) {
    for alert in alerts {
      for handler in &self.handlers {
        handler.handle(&alert).await;
      }
    }
  }

  fn evaluate_alerts(&self, counters: &mut Counters, now: i64) -> Vec<Alert> {
    if !self.config.enabled {
      return vec![];
    }

    let mut fired = Vec::new();
    let total = counters.window.len().max(1) as f64;
    let errors = counters.window.iter().filter(|(_, status, _)| *status >= 400).count() as f64;
    let error_rate = errors / total;
    if error_rate > self.config.thresholds.error_rate {
      fired.push(Alert {
        kind: AlertKind::ErrorRate,
        message: format!("error rate {error_rate:.3} exceeds threshold {}", self.config.thresholds.error_rate),
        value: error_rate,
        threshold: self.config.thresholds.error_rate,
        at: chrono::Utc::now(),
      });
    }

    let avg_ms = avg_response_time(&counters.window);
    if avg_ms > self.config.thresholds.response_time {
      fired.push(Alert {
        kind: AlertKind::ResponseTime,
        message: format!("avg response time {avg_ms:.1}ms exceeds threshold {}ms", self.config.thresholds.response_time),
        value: avg_ms,
        threshold: self.config.thresholds.response_time,
        at: chrono::Utc::now(),
      });
    }

    let requests = counters.total_requests.max(1) as f64;
    let auth_failure_rate = counters.auth_failures as f64 / requests;
    if auth_failure_rate > self.config.thresholds.auth_failures {
      fired.push(Alert {
        kind: AlertKind::AuthFailureRate,
        message: format!("auth failure rate {auth_failure_rate:.3} exceeds threshold {}", self.config.thresholds.auth_failures),
        value: auth_failure_rate,
        threshold: self.config.thresholds.auth_failures,
        at: chrono::Utc::now(),
      });
    }

    let rate_limit_rate = counters.rate_limit_hits as f64 / requests;
    if rate_limit_rate > self.config.thresholds.rate_limit {
      fired.push(Alert {
        kind: AlertKind::RateLimitHitRate,
        message: format!("rate limit hit rate {rate_limit_rate:.3} exceeds threshold {}", self.config.thresholds.rate_limit),
        value: rate_limit_rate,
        threshold: self.config.thresholds.rate_limit,
        at: chrono::Utc::now(),
      });
    }

    if !fired.is_empty() {
      counters.recent_alerts.push_back(now);
      while counters.recent_alerts.front().is_some_and(|ts| now - ts > 300) {
        counters.recent_alerts.pop_front();
      }
    }

    return fired;
  }

  /// Health score starts at 100 and deducts per §4.9: -30 error rate over
  /// threshold, -20 avg response time over threshold, -25 any alert in the
  /// last 5 minutes. Mapping to status: ≥80 healthy, 50-79 degraded, <50
  /// critical.
  pub fn health(&self) -> HealthReport {
    let now = chrono::Utc::now().timestamp();
    let mut counters = self.counters.lock();
    prune_window(&mut counters.window, now);

    let mut score: i32 = 100;

    let total = counters.window.len().max(1) as f64;
    let errors = counters.window.iter().filter(|(_, status, _)| *status >= 400).count() as f64;
    let error_rate = errors / total;
    if error_rate > self.config.thresholds.error_rate {
      score -= 30;
    }

    let avg_ms = avg_response_time(&counters.window);
    if avg_ms > self.config.thresholds.response_time {
      score -= 20;
    }

    while counters.recent_alerts.front().is_some_and(|ts| now - ts > 300) {
      counters.recent_alerts.pop_front();
    }
    if !counters.recent_alerts.is_empty() {
      score -= 25;
    }

    let score = score.clamp(0, 100);
    return HealthReport {
      score,
      status: HealthStatus::from_score(score),
      total_requests: counters.total_requests,
      total_errors: counters.total_errors,
      auth_failures: counters.auth_failures,
      rate_limit_hits: counters.rate_limit_hits,
      avg_response_time_ms: avg_ms,
    };
  }
}

fn prune_window(window: &mut VecDeque<(i64, u16, u64)>, now: i64) {
  while window.front().is_some_and(|(ts, _, _)| now - ts > WINDOW_SECONDS) {
    window.pop_front();
  }
}

fn avg_response_time(window: &VecDeque<(i64, u16, u64)>) -> f64 {
  if window.is_empty() {
    return 0.0;
  }
  let sum: u64 = window.iter().map(|(_, _, ms)| ms).sum();
  return sum as f64 / window.len() as f64;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::MonitoringThresholds;

  fn monitor() -> Monitor {
    return Monitor::new(
      MonitoringConfig {
        enabled: true,
        thresholds: MonitoringThresholds {
          error_rate: 0.05,
          response_time: 1000.0,
          auth_failures: 0.1,
          rate_limit: 0.1,
        },
        alert_handlers: vec![],
        webhook_url: None,
        slack_webhook_url: None,
      },
      vec![],
    );
  }

  #[tokio::test]
  async fn healthy_with_no_traffic() {
    let monitor = monitor();
    let report = monitor.health();
    assert_eq!(report.score, 100);
    assert_eq!(report.status, HealthStatus::Healthy);
  }

  #[tokio::test]
  async fn error_rate_over_threshold_degrades_score() {
    let monitor = monitor();
    for _ in 0..10 {
      monitor.record_response(500, 10, 100).await;
    }
    let report = monitor.health();
    // -30 error rate, -25 a qualifying alert fired within the last 5 minutes.
    assert_eq!(report.score, 45);
    assert_eq!(report.status, HealthStatus::Critical);
  }

  #[tokio::test]
  async fn slow_responses_also_degrade_score() {
    let monitor = monitor();
    for _ in 0..5 {
      monitor.record_response(200, 5000, 100).await;
    }
    let report = monitor.health();
    // -20 response time, -25 a qualifying alert fired within the last 5 minutes.
    assert_eq!(report.score, 55);
  }

  #[test]
  fn health_status_buckets_match_the_spec() {
    assert_eq!(HealthStatus::from_score(100), HealthStatus::Healthy);
    assert_eq!(HealthStatus::from_score(80), HealthStatus::Healthy);
    assert_eq!(HealthStatus::from_score(79), HealthStatus::Degraded);
    assert_eq!(HealthStatus::from_score(50), HealthStatus::Degraded);
    assert_eq!(HealthStatus::from_score(49), HealthStatus::Critical);
  }
}
