//! Periodic health checker

use super::{
    classify, notification_for, HealthNotification, Probe, ProbeResult, ServiceId, ServiceStatus,
    StatusCache,
};
use crate::config::HealthConfig;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Runs every probe on a fixed cadence for the lifetime of the application,
/// independent of any research run.
pub struct HealthPoller {
    probes: Vec<Arc<dyn Probe>>,
    cache: StatusCache,
    notifications: mpsc::UnboundedSender<HealthNotification>,
    initial_delay: Duration,
    interval: Duration,
    probe_timeout: Duration,
    degraded_threshold_ms: u64,
}

impl HealthPoller {
    pub fn new(
        cache: StatusCache,
        notifications: mpsc::UnboundedSender<HealthNotification>,
    ) -> Self {
        Self::from_config(&HealthConfig::default(), cache, notifications)
    }

    pub fn from_config(
        config: &HealthConfig,
        cache: StatusCache,
        notifications: mpsc::UnboundedSender<HealthNotification>,
    ) -> Self {
        Self {
            probes: Vec::new(),
            cache,
            notifications,
            initial_delay: config.initial_delay(),
            interval: config.interval(),
            probe_timeout: Duration::from_millis(
                config.backend_timeout_ms.max(config.llm_timeout_ms),
            ),
            degraded_threshold_ms: config.degraded_threshold_ms,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Hard upper bound on a single probe, on top of the probe's own timeout
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &StatusCache {
        &self.cache
    }

    async fn run_probe(&self, probe: &Arc<dyn Probe>) -> (ServiceId, ProbeResult, u64) {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.probe_timeout, probe.check()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(service = %probe.service(), "Health probe timed out");
                ProbeResult::unreachable()
            }
        };
        (probe.service(), result, started.elapsed().as_millis() as u64)
    }

    /// Run all probes once, concurrently, then classify, store and notify.
    pub async fn poll_once(&self) -> Vec<(ServiceId, ServiceStatus)> {
        let results = join_all(self.probes.iter().map(|probe| self.run_probe(probe))).await;

        let mut statuses = Vec::with_capacity(results.len());
        for (service, result, elapsed_ms) in results {
            let status = classify(&result, self.degraded_threshold_ms);
            let (previous, flushed) = self.cache.record(service, status).await;
            if let Err(e) = flushed {
                tracing::warn!(%service, error = %e, "Failed to persist service status");
            }

            tracing::debug!(
                %service,
                classification = %status.classification,
                latency_ms = ?status.latency_ms,
                elapsed_ms,
                "Health check"
            );

            if let Some(notification) = notification_for(service, previous, &status) {
                tracing::info!(%service, "{}", notification.message());
                let _ = self.notifications.send(notification);
            }
            statuses.push((service, status));
        }
        statuses
    }

    /// Poll until `cancel` fires: first after the initial delay, then every interval.
    pub async fn run(self, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        tracing::debug!("Health poller stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
