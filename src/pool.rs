//! Connection Pool: a bounded set of MCP clients per HTTP-transport server
//! (`spec.md` §4.3). stdio and SSE servers are single-session and never
//! pooled; `ConnectionPool` is only constructed for `McpServer::is_http()`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

use crate::client::McpClient;
use crate::config::McpServer;
use crate::logging::LogManager;

const DEFAULT_MAX_ALLOWED: usize = 10;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out waiting for a pooled client for '{server}'")]
    AcquireTimeout { server: String },
    #[error("failed to create a new client for '{server}': {message}")]
    Create { server: String, message: String },
    #[error("pool for '{server}' is closed")]
    Closed { server: String },
}

struct IdleEntry {
    client: Arc<Mutex<McpClient>>,
    idle_since: Instant,
}

/// Point-in-time pool statistics (`spec.md` §4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub total: usize,
    pub in_use: usize,
    pub idle: usize,
    pub max_allowed: usize,
    pub wait_queue_depth: usize,
}

/// A client leased from the pool. Returns itself to the idle list on drop
/// via a detached task, since `Drop` cannot await.
pub struct LeasedClient {
    pool: Arc<PoolInner>,
    client: Option<Arc<Mutex<McpClient>>>,
    healthy: bool,
}

impl LeasedClient {
    pub fn client(&self) -> &Arc<Mutex<McpClient>> {
        self.client.as_ref().expect("leased client taken")
    }

    /// Mark this lease as unhealthy so the pool closes the client instead of
    /// returning it to the idle list. Call this after an observed failure.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }
}

impl Drop for LeasedClient {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else { return };
        let pool = Arc::clone(&self.pool);
        let healthy = self.healthy;
        tokio::spawn(async move {
            pool.release(client, healthy).await;
        });
    }
}

struct PoolInner {
    server_name: String,
    server: McpServer,
    log_manager: Arc<LogManager>,
    idle: Mutex<VecDeque<IdleEntry>>,
    in_use: AtomicUsize,
    total: AtomicUsize,
    wait_queue_depth: AtomicUsize,
    max_allowed: usize,
    idle_timeout: Duration,
    notify: Notify,
}

impl PoolInner {
    async fn release(&self, client: Arc<Mutex<McpClient>>, healthy: bool) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);

        if !healthy {
            self.total.fetch_sub(1, Ordering::SeqCst);
            let mut guard = client.lock().await;
            let _ = guard.disconnect().await;
        } else {
            self.idle.lock().await.push_back(IdleEntry { client, idle_since: Instant::now() });
        }
        self.notify.notify_one();
    }
}

/// Bounded pool of MCP clients connecting to a single HTTP-transport server.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(server_name: String, server: McpServer, log_manager: Arc<LogManager>) -> Self {
        Self::with_limits(server_name, server, log_manager, DEFAULT_MAX_ALLOWED, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_limits(server_name: String, server: McpServer, log_manager: Arc<LogManager>, max_allowed: usize, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                server_name,
                server,
                log_manager,
                idle: Mutex::new(VecDeque::new()),
                in_use: AtomicUsize::new(0),
                total: AtomicUsize::new(0),
                wait_queue_depth: AtomicUsize::new(0),
                max_allowed,
                idle_timeout,
                notify: Notify::new(),
            }),
        }
    }

    /// Acquire an idle client, or create a new one below the cap, blocking up
    /// to `deadline` otherwise.
    pub async fn acquire(&self, deadline: Duration) -> Result<LeasedClient, PoolError> {
        timeout(deadline, self.acquire_inner()).await.map_err(|_| PoolError::AcquireTimeout {
            server: self.inner.server_name.clone(),
        })?
    }

    async fn acquire_inner(&self) -> Result<LeasedClient, PoolError> {
        loop {
            if let Some(entry) = self.inner.idle.lock().await.pop_front() {
                self.inner.in_use.fetch_add(1, Ordering::SeqCst);
                return Ok(LeasedClient {
                    pool: Arc::clone(&self.inner),
                    client: Some(entry.client),
                    healthy: true,
                });
            }

            if self.inner.total.load(Ordering::SeqCst) < self.inner.max_allowed {
                self.inner.total.fetch_add(1, Ordering::SeqCst);
                match self.create_client().await {
                    Ok(client) => {
                        self.inner.in_use.fetch_add(1, Ordering::SeqCst);
                        return Ok(LeasedClient {
                            pool: Arc::clone(&self.inner),
                            client: Some(Arc::new(Mutex::new(client))),
                            healthy: true,
                        });
                    }
                    Err(err) => {
                        self.inner.total.fetch_sub(1, Ordering::SeqCst);
                        return Err(PoolError::Create {
                            server: self.inner.server_name.clone(),
                            message: err.to_string(),
                        });
                    }
                }
            }

            self.inner.wait_queue_depth.fetch_add(1, Ordering::SeqCst);
            self.inner.notify.notified().await;
            self.inner.wait_queue_depth.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn create_client(&self) -> anyhow::Result<McpClient> {
        let mut client = McpClient::new(self.inner.server_name.clone(), self.inner.server.clone(), Arc::clone(&self.inner.log_manager));
        client.connect().await?;
        Ok(client)
    }

    pub fn stats(&self) -> PoolStats {
        let in_use = self.inner.in_use.load(Ordering::SeqCst);
        let total = self.inner.total.load(Ordering::SeqCst);
        PoolStats {
            total,
            in_use,
            idle: total.saturating_sub(in_use),
            max_allowed: self.inner.max_allowed,
            wait_queue_depth: self.inner.wait_queue_depth.load(Ordering::SeqCst),
        }
    }

    /// Close idle clients that have outlived `idle_timeout`. Intended to be
    /// called periodically by a background janitor task.
    pub async fn evict_idle(&self) {
        let cutoff = Instant::now() - self.inner.idle_timeout;
        let mut idle = self.inner.idle.lock().await;
        let mut keep = VecDeque::with_capacity(idle.len());
        while let Some(entry) = idle.pop_front() {
            if entry.idle_since <= cutoff {
                self.inner.total.fetch_sub(1, Ordering::SeqCst);
                let mut guard = entry.client.lock().await;
                let _ = guard.disconnect().await;
            } else {
                keep.push_back(entry);
            }
        }
        *idle = keep;
    }

    /// Spawn a background task that evicts idle clients every `period`.
    pub fn spawn_janitor(pool: Arc<ConnectionPool>, period: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                pool.evict_idle().await;
            }
        });
    }

    pub async fn close_all(&self) {
        let mut idle = self.inner.idle.lock().await;
        while let Some(entry) = idle.pop_front() {
            let mut guard = entry.client.lock().await;
            let _ = guard.disconnect().await;
        }
        self.inner.total.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> McpServer {
        McpServer {
            base_url: Some("http://127.0.0.1:9".parse().unwrap()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn acquire_below_cap_fails_fast_on_unreachable_server() {
        let pool = ConnectionPool::new("srv".to_string(), server(), Arc::new(LogManager::new().unwrap()));
        let result = pool.acquire(Duration::from_millis(50)).await;
        assert!(result.is_err());
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.total, 0);
    }

    #[test]
    fn stats_invariant_total_equals_in_use_plus_idle() {
        let stats = PoolStats {
            total: 3,
            in_use: 1,
            idle: 2,
            max_allowed: 10,
            wait_queue_depth: 0,
        };
        assert_eq!(stats.in_use + stats.idle, stats.total);
    }
}
