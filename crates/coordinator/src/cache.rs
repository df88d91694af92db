//! In-memory server-list cache with TTL and single-flight refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::CoordinatorClient;
use crate::error::{Error, Result};
use crate::types::ServerRecord;

/// How long a fetched listing stays fresh.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Source of server listings. The seam exists so tests can script refreshes
/// without a live coordinator.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_servers(&self) -> Result<Vec<ServerRecord>>;
}

#[async_trait]
impl ListingSource for CoordinatorClient {
    async fn fetch_servers(&self) -> Result<Vec<ServerRecord>> {
        self.list_servers().await
    }
}

struct CacheEntry {
    servers: Vec<ServerRecord>,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entry: Option<CacheEntry>,
    /// Bumped once per completed refresh attempt, success or failure.
    generation: u64,
    last_error: Option<String>,
}

/// Singleton cache over the coordinator's listing flow.
///
/// At most one refresh is in flight regardless of concurrent callers; the
/// rest wait on the refresh mutex and adopt the finished attempt's outcome
/// instead of dialing the coordinator again. A failed refresh serves the
/// previous listing when one exists and never advances `fetched_at`.
pub struct ServerListCache {
    source: Arc<dyn ListingSource>,
    ttl: Duration,
    state: Mutex<CacheState>,
    refresh: Mutex<()>,
}

impl ServerListCache {
    pub fn new(source: Arc<dyn ListingSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: Mutex::new(CacheState::default()),
            refresh: Mutex::new(()),
        }
    }

    /// The cached listing, refreshed through the source when stale.
    pub async fn get(&self) -> Result<Vec<ServerRecord>> {
        let generation_seen = {
            let state = self.state.lock().await;
            if let Some(entry) = &state.entry {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.servers.clone());
                }
            }
            state.generation
        };

        let _refresh = self.refresh.lock().await;

        {
            let state = self.state.lock().await;
            if state.generation != generation_seen {
                // Someone else refreshed while we queued; share its outcome.
                if let Some(entry) = &state.entry {
                    return Ok(entry.servers.clone());
                }
                let detail = state
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "no listing available".to_owned());
                return Err(Error::Refresh(detail));
            }
        }

        debug!("server list stale, refreshing");
        match self.source.fetch_servers().await {
            Ok(servers) => {
                counter!("server_list_refreshes_total", "outcome" => "ok").increment(1);
                info!("server list refreshed, {} servers", servers.len());
                let mut state = self.state.lock().await;
                state.generation += 1;
                state.last_error = None;
                state.entry = Some(CacheEntry {
                    servers: servers.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(servers)
            }
            Err(e) => {
                counter!("server_list_refreshes_total", "outcome" => "error").increment(1);
                let mut state = self.state.lock().await;
                state.generation += 1;
                state.last_error = Some(e.to_string());
                if let Some(entry) = &state.entry {
                    warn!("server list refresh failed, serving stale listing: {e}");
                    return Ok(entry.servers.clone());
                }
                warn!("server list refresh failed with empty cache: {e}");
                Err(e)
            }
        }
    }
}
