//! Service health monitoring
//!
//! Two external services (the research backend and the LLM API) are probed
//! on a fixed cadence. Each probe result is classified (pure, see
//! [`classify`]) and compared with the previous classification to decide
//! whether to notify (pure, see [`notification_for`]). The poller glues the
//! two together and owns the only writer to the [`StatusCache`].

mod cache;
mod poller;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cache::StatusCache;
pub use poller::HealthPoller;

/// Latency above which a reachable service counts as degraded
pub const DEGRADED_THRESHOLD_MS: u64 = 1500;

/// Monitored service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceId {
    Backend,
    Llm,
}

impl ServiceId {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Backend => "Backend server",
            Self::Llm => "LLM API",
        }
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend => write!(f, "backend"),
            Self::Llm => write!(f, "llm"),
        }
    }
}

/// Raw outcome of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub reachable: bool,
    pub latency_ms: Option<u64>,
}

impl ProbeResult {
    pub fn reachable(latency_ms: u64) -> Self {
        Self {
            reachable: true,
            latency_ms: Some(latency_ms),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            latency_ms: None,
        }
    }
}

/// Liveness check for one service. Implementations should bound their own
/// runtime; the poller adds a hard timeout on top.
#[async_trait]
pub trait Probe: Send + Sync {
    fn service(&self) -> ServiceId;

    async fn check(&self) -> ProbeResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Online,
    Degraded,
    Offline,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Degraded => write!(f, "degraded"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Stored status of one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub classification: Classification,
    pub latency_ms: Option<u64>,
}

/// Classify a probe result.
///
/// Unreachable is offline. Reachable but slower than `threshold_ms`, or with
/// no latency measurement at all, is degraded.
pub fn classify(result: &ProbeResult, threshold_ms: u64) -> ServiceStatus {
    let classification = if !result.reachable {
        Classification::Offline
    } else {
        match result.latency_ms {
            Some(ms) if ms <= threshold_ms => Classification::Online,
            _ => Classification::Degraded,
        }
    };

    ServiceStatus {
        classification,
        latency_ms: result.latency_ms,
    }
}

/// Edge-triggered notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthNotification {
    Offline { service: ServiceId },
    Reconnected { service: ServiceId, latency_ms: Option<u64> },
}

impl HealthNotification {
    pub fn message(&self) -> String {
        match self {
            Self::Offline { service } => format!("{} is offline.", service.display_name()),
            Self::Reconnected { service, .. } => format!("{} connected.", service.display_name()),
        }
    }
}

/// Decide whether a classification change deserves a notification.
///
/// `previous` is `None` before the first check. Going offline from any other
/// state notifies once; staying offline does not. Coming back online after
/// being offline or degraded notifies; the very first observation is silent.
pub fn notification_for(
    service: ServiceId,
    previous: Option<Classification>,
    current: &ServiceStatus,
) -> Option<HealthNotification> {
    match (previous, current.classification) {
        (Some(Classification::Offline), Classification::Offline) => None,
        (_, Classification::Offline) => Some(HealthNotification::Offline { service }),
        (Some(Classification::Offline | Classification::Degraded), Classification::Online) => {
            Some(HealthNotification::Reconnected {
                service,
                latency_ms: current.latency_ms,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let t = DEGRADED_THRESHOLD_MS;
        let class = |probe: ProbeResult| classify(&probe, t).classification;
        assert_eq!(class(ProbeResult::reachable(120)), Classification::Online);
        assert_eq!(class(ProbeResult::reachable(1500)), Classification::Online);
        assert_eq!(class(ProbeResult::reachable(2000)), Classification::Degraded);
        assert_eq!(class(ProbeResult::unreachable()), Classification::Offline);

        let no_latency = ProbeResult {
            reachable: true,
            latency_ms: None,
        };
        assert_eq!(classify(&no_latency, t).classification, Classification::Degraded);
    }

    #[test]
    fn test_classify_keeps_latency() {
        let status = classify(&ProbeResult::reachable(2000), DEGRADED_THRESHOLD_MS);
        assert_eq!(status.latency_ms, Some(2000));
    }

    fn status(classification: Classification) -> ServiceStatus {
        ServiceStatus {
            classification,
            latency_ms: None,
        }
    }

    #[test]
    fn test_offline_notifies_once_per_outage() {
        let svc = ServiceId::Backend;
        let offline = status(Classification::Offline);

        assert_eq!(
            notification_for(svc, None, &offline),
            Some(HealthNotification::Offline { service: svc })
        );
        assert!(notification_for(svc, Some(Classification::Online), &offline).is_some());
        assert!(notification_for(svc, Some(Classification::Degraded), &offline).is_some());
        assert_eq!(notification_for(svc, Some(Classification::Offline), &offline), None);
    }

    #[test]
    fn test_reconnect_edges() {
        let svc = ServiceId::Llm;
        let online = status(Classification::Online);

        assert_eq!(notification_for(svc, None, &online), None);
        assert_eq!(notification_for(svc, Some(Classification::Online), &online), None);
        assert!(matches!(
            notification_for(svc, Some(Classification::Offline), &online),
            Some(HealthNotification::Reconnected { .. })
        ));
        assert!(matches!(
            notification_for(svc, Some(Classification::Degraded), &online),
            Some(HealthNotification::Reconnected { .. })
        ));
        assert_eq!(
            notification_for(svc, Some(Classification::Offline), &status(Classification::Degraded)),
            None
        );
    }

    #[test]
    fn test_notification_messages() {
        assert_eq!(
            HealthNotification::Offline { service: ServiceId::Backend }.message(),
            "Backend server is offline."
        );
        assert_eq!(
            HealthNotification::Reconnected {
                service: ServiceId::Llm,
                latency_ms: Some(10)
            }
            .message(),
            "LLM API connected."
        );
    }
}
