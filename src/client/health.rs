//! Health monitoring for MCP servers: a shared status map updated either by
//! direct reporting (connect/call outcomes) or by a periodic background
//! probe loop.

use crate::types::HealthStatus;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::debug;

/// Outcome of a single health probe.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// A pluggable way to probe a named server's liveness. The health monitor has
/// no access to live MCP clients itself; the Server Manager supplies an
/// implementation that dispatches into its own client registry.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, server_name: &str) -> HealthCheckResult;
}

/// Tracks [`HealthStatus`] per server name and, once started, runs a
/// background loop that re-probes every registered server on an interval.
#[derive(Clone)]
pub struct HealthMonitor {
    health_status: Arc<Mutex<HashMap<String, HealthStatus>>>,
    check_interval: Duration,
    monitoring: Arc<Mutex<bool>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            health_status: Arc::new(Mutex::new(HashMap::new())),
            check_interval: Duration::from_secs(30),
            monitoring: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_interval(check_interval: Duration) -> Self {
        Self {
            check_interval,
            ..Self::new()
        }
    }

    /// Start the background probe loop using `probe` to check each registered server.
    pub async fn start(&self, probe: Arc<dyn HealthProbe>) {
        let mut monitoring = self.monitoring.lock().await;
        if *monitoring {
            return;
        }
        *monitoring = true;
        drop(monitoring);

        let health_status = Arc::clone(&self.health_status);
        let monitoring = Arc::clone(&self.monitoring);
        let check_interval = self.check_interval;

        tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            loop {
                ticker.tick().await;

                if !*monitoring.lock().await {
                    break;
                }

                let names: Vec<String> = health_status.lock().await.keys().cloned().collect();
                for name in names {
                    let result = probe.probe(&name).await;
                    let mut statuses = health_status.lock().await;
                    if let Some(status) = statuses.get_mut(&name) {
                        if result.healthy {
                            status.record_success(result.latency_ms.unwrap_or(0));
                        } else {
                            status.record_failure(result.error.unwrap_or_else(|| "probe failed".to_string()));
                        }
                    }
                }
            }
        });

        debug!("health monitoring started");
    }

    pub async fn stop(&self) {
        *self.monitoring.lock().await = false;
        debug!("health monitoring stopped");
    }

    pub async fn is_monitoring(&self) -> bool {
        *self.monitoring.lock().await
    }

    pub async fn register_server(&self, name: String) {
        self.health_status.lock().await.insert(name, HealthStatus::new());
    }

    pub async fn unregister_server(&self, name: &str) {
        self.health_status.lock().await.remove(name);
    }

    pub async fn record_success(&self, name: &str, latency_ms: u64) {
        let mut statuses = self.health_status.lock().await;
        statuses.entry(name.to_string()).or_insert_with(HealthStatus::new).record_success(latency_ms);
    }

    pub async fn record_failure(&self, name: &str, error: impl Into<String>) {
        let mut statuses = self.health_status.lock().await;
        statuses.entry(name.to_string()).or_insert_with(HealthStatus::new).record_failure(error);
    }

    pub async fn get_health(&self, name: &str) -> Option<HealthStatus> {
        self.health_status.lock().await.get(name).cloned()
    }

    pub async fn get_all_health(&self) -> HashMap<String, HealthStatus> {
        self.health_status.lock().await.clone()
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_record_success_marks_healthy() {
        let monitor = HealthMonitor::new();
        monitor.register_server("srv".to_string()).await;
        assert!(!monitor.get_health("srv").await.unwrap().is_healthy());

        monitor.record_success("srv", 12).await;
        assert!(monitor.get_health("srv").await.unwrap().is_healthy());

        monitor.unregister_server("srv").await;
        assert!(monitor.get_health("srv").await.is_none());
    }

    #[tokio::test]
    async fn start_stop_toggles_monitoring_flag() {
        struct AlwaysHealthy;
        #[async_trait]
        impl HealthProbe for AlwaysHealthy {
            async fn probe(&self, _name: &str) -> HealthCheckResult {
                HealthCheckResult {
                    healthy: true,
                    latency_ms: Some(1),
                    error: None,
                }
            }
        }

        let monitor = HealthMonitor::new();
        assert!(!monitor.is_monitoring().await);
        monitor.start(Arc::new(AlwaysHealthy)).await;
        assert!(monitor.is_monitoring().await);
        monitor.stop().await;
        assert!(!monitor.is_monitoring().await);
    }
}
