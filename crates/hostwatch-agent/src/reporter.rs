//! Snapshot delivery: a bounded FIFO with drop-oldest backpressure feeding
//! a single sender task. An element leaves the queue only on a 2xx from the
//! collector or when capacity pressure evicts it.

use crate::config::AgentConfig;
use crate::state::AgentContext;
use hostwatch_common::types::MetricsSnapshot;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

pub struct Reporter {
    queue: Mutex<VecDeque<(u64, Value)>>,
    next_seq: AtomicU64,
    notify: Notify,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Push one payload, evicting from the front when the queue is at
    /// capacity.
    pub fn enqueue(&self, payload: Value, capacity: usize) {
        {
            let mut queue = self.queue.lock().unwrap();
            if capacity > 0 {
                while queue.len() >= capacity {
                    queue.pop_front();
                    tracing::debug!("send buffer full, dropping oldest snapshot");
                }
            }
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            queue.push_back((seq, payload));
        }
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn front(&self) -> Option<(u64, Value)> {
        self.queue.lock().unwrap().front().cloned()
    }

    /// Pop the front element only if it is still the one the sender just
    /// delivered; drop-oldest may have evicted it mid-flight.
    fn ack(&self, seq: u64) {
        let mut queue = self.queue.lock().unwrap();
        if queue.front().map(|(front_seq, _)| *front_seq) == Some(seq) {
            queue.pop_front();
        }
    }

    async fn wait_nonempty(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            if *shutdown.borrow() {
                return false;
            }
            if !self.is_empty() {
                return true;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Queue contents, oldest first. Test hook.
    pub fn pending(&self) -> Vec<Value> {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

/// Snapshot JSON plus the agent identity fields the collector keys on.
pub fn snapshot_payload(config: &AgentConfig, snapshot: &MetricsSnapshot) -> Value {
    let mut payload = serde_json::to_value(snapshot).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut payload {
        map.insert("agent_id".to_string(), Value::String(config.agent_id.clone()));
        map.insert(
            "machine_name".to_string(),
            Value::String(config.machine_name.clone()),
        );
    }
    payload
}

/// POST target derived from the configured sink URL.
pub fn metrics_url(server_url: &str) -> String {
    let trimmed = server_url.trim_end_matches('/');
    if trimmed.ends_with("/metrics") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/metrics")
    }
}

/// Sender task: transmit the front element, pop on 2xx, otherwise keep it
/// and retry after one send-timeout of spacing.
pub async fn run_sender(
    ctx: Arc<AgentContext>,
    client: reqwest::Client,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if !ctx.reporter.wait_nonempty(&mut shutdown).await {
            tracing::info!("sender stopping");
            return;
        }
        let Some((seq, payload)) = ctx.reporter.front() else {
            continue;
        };

        let (url, timeout_ms) = {
            let config = ctx.config.lock().unwrap();
            (metrics_url(&config.server_url), config.send_timeout_ms)
        };

        let sent = client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .json(&payload)
            .send()
            .await;

        match sent {
            Ok(response) if response.status().is_success() => {
                ctx.reporter.ack(seq);
                tracing::debug!(pending = ctx.reporter.len(), "snapshot delivered");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), url = %url,
                    "collector rejected snapshot, will retry");
                wait_or_shutdown(Duration::from_millis(timeout_ms.max(1)), &mut shutdown).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, url = %url, "snapshot send failed, will retry");
                wait_or_shutdown(Duration::from_millis(timeout_ms.max(1)), &mut shutdown).await;
            }
        }
    }
}

/// Sampling loop: collect on the configured cadence and enqueue.
pub async fn run_sampler(ctx: Arc<AgentContext>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            tracing::info!("sampler stopping");
            return;
        }

        let (families, capacity, frequency) = {
            let config = ctx.config.lock().unwrap();
            (
                config.enabled_families(),
                config.max_buffer_size,
                config.update_frequency_s.max(1),
            )
        };

        let probe_ctx = Arc::clone(&ctx);
        let selection = families.into_iter().collect();
        let collected =
            tokio::task::spawn_blocking(move || probe_ctx.probe.collect(&selection)).await;

        match collected {
            Ok(snapshot) => {
                let payload = {
                    let config = ctx.config.lock().unwrap();
                    snapshot_payload(&config, &snapshot)
                };
                ctx.reporter.enqueue(payload, capacity);
            }
            Err(err) => {
                tracing::warn!(error = %err, "collection task failed");
            }
        }

        if !wait_or_shutdown(Duration::from_secs(frequency), &mut shutdown).await {
            tracing::info!("sampler stopping");
            return;
        }
    }
}

/// Sleep, returning early (false) when shutdown is requested.
async fn wait_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enqueue_keeps_fifo_order() {
        let reporter = Reporter::new();
        for i in 0..3 {
            reporter.enqueue(json!({"n": i}), 10);
        }
        let pending = reporter.pending();
        assert_eq!(pending[0]["n"], 0);
        assert_eq!(pending[2]["n"], 2);
    }

    #[test]
    fn full_queue_drops_the_oldest() {
        let reporter = Reporter::new();
        for i in 0..10 {
            reporter.enqueue(json!({"n": i}), 3);
        }
        let pending = reporter.pending();
        assert_eq!(pending.len(), 3);
        // The three most recently produced survive.
        assert_eq!(pending[0]["n"], 7);
        assert_eq!(pending[1]["n"], 8);
        assert_eq!(pending[2]["n"], 9);
    }

    #[test]
    fn ack_skips_elements_evicted_mid_flight() {
        let reporter = Reporter::new();
        reporter.enqueue(json!({"n": 0}), 10);
        let (seq, _) = reporter.front().unwrap();

        // The in-flight element is evicted by capacity pressure.
        reporter.enqueue(json!({"n": 1}), 1);
        assert_eq!(reporter.len(), 1);

        reporter.ack(seq);
        // The newer element must not be popped by the stale ack.
        assert_eq!(reporter.len(), 1);
        assert_eq!(reporter.pending()[0]["n"], 1);
    }

    #[test]
    fn payload_carries_agent_identity() {
        let mut config = AgentConfig::default();
        config.agent_id = "agent_1_0001".into();
        config.machine_name = "build-box".into();
        let snapshot = MetricsSnapshot {
            timestamp: 1,
            machine_type: "physical".into(),
            ..Default::default()
        };
        let payload = snapshot_payload(&config, &snapshot);
        assert_eq!(payload["agent_id"], "agent_1_0001");
        assert_eq!(payload["machine_name"], "build-box");
        assert_eq!(payload["machine_type"], "physical");
    }

    #[test]
    fn metrics_url_appends_only_when_missing() {
        assert_eq!(
            metrics_url("http://collector:8000"),
            "http://collector:8000/metrics"
        );
        assert_eq!(
            metrics_url("http://collector:8000/"),
            "http://collector:8000/metrics"
        );
        assert_eq!(
            metrics_url("http://collector:8000/metrics"),
            "http://collector:8000/metrics"
        );
    }
}
