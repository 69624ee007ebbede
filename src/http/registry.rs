//! Tunnel registry - every tunnel reachable by HTTP requests
//!
//! Tunnels are registered on connect and looked up by identifier for each
//! read and write. Every lookup refreshes the tunnel's last access time, so
//! tunnels whose browser client went away can be reaped once idle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{Result, TunnelError};
use crate::http::TunnelHook;
use crate::net::Tunnel;

struct Entry {
    tunnel: Arc<Tunnel>,
    /// Milliseconds since the registry was created.
    last_access: AtomicU64,
}

/// Map of identifier to tunnel
pub struct TunnelRegistry {
    tunnels: RwLock<HashMap<String, Entry>>,
    on_remove: Option<TunnelHook>,
    epoch: Instant,
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            tunnels: RwLock::new(HashMap::new()),
            on_remove: None,
            epoch: Instant::now(),
        }
    }

    /// Builder: call `hook` once for every tunnel removed from the registry.
    pub fn with_remove_hook(mut self, hook: impl Fn(&Arc<Tunnel>) + Send + Sync + 'static) -> Self {
        self.on_remove = Some(Arc::new(hook));
        self
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Register `tunnel` under its identifier.
    pub async fn put(&self, tunnel: Arc<Tunnel>) -> Result<()> {
        let mut tunnels = self.tunnels.write().await;
        if tunnels.contains_key(tunnel.id()) {
            return Err(TunnelError::Server(format!(
                "Tunnel \"{}\" is already registered.",
                tunnel.id()
            )));
        }

        let id = tunnel.id().to_string();
        tunnels.insert(
            id.clone(),
            Entry {
                tunnel,
                last_access: AtomicU64::new(self.now()),
            },
        );
        log::debug!("Registered tunnel \"{}\".", id);
        Ok(())
    }

    /// Look up a tunnel, refreshing its last access time.
    pub async fn get(&self, id: &str) -> Option<Arc<Tunnel>> {
        let tunnels = self.tunnels.read().await;
        let entry = tunnels.get(id)?;
        entry.last_access.store(self.now(), Ordering::Release);
        Some(entry.tunnel.clone())
    }

    /// Remove a tunnel. The remove hook runs if it was registered.
    pub async fn remove(&self, id: &str) -> Option<Arc<Tunnel>> {
        let removed = self.tunnels.write().await.remove(id)?;
        log::debug!("Deregistered tunnel \"{}\".", id);
        self.removed(&removed.tunnel);
        Some(removed.tunnel)
    }

    fn removed(&self, tunnel: &Arc<Tunnel>) {
        if let Some(hook) = &self.on_remove {
            hook(tunnel);
        }
    }

    pub async fn len(&self) -> usize {
        self.tunnels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tunnels.read().await.is_empty()
    }

    /// Close and remove every tunnel not accessed within `timeout`.
    ///
    /// Returns the number of tunnels reaped.
    pub async fn reap_idle(&self, timeout: Duration) -> usize {
        let now = self.now();
        let limit = timeout.as_millis() as u64;

        let reaped: Vec<Arc<Tunnel>> = {
            let mut tunnels = self.tunnels.write().await;
            let idle: Vec<String> = tunnels
                .iter()
                .filter(|(_, entry)| {
                    now.saturating_sub(entry.last_access.load(Ordering::Acquire)) > limit
                })
                .map(|(id, _)| id.clone())
                .collect();
            idle.iter()
                .filter_map(|id| tunnels.remove(id))
                .map(|entry| entry.tunnel)
                .collect()
        };

        for tunnel in &reaped {
            log::info!("Tunnel \"{}\" idle for over {:?}, closing.", tunnel.id(), timeout);
            tunnel.close();
            self.removed(tunnel);
        }
        reaped.len()
    }

    /// Run [`reap_idle`](Self::reap_idle) every `interval` for as long as
    /// the registry is alive.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, timeout: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.reap_idle(timeout).await;
            }
        })
    }

    /// Close and remove every tunnel.
    pub async fn shutdown(&self) {
        let drained: Vec<Entry> = self.tunnels.write().await.drain().map(|(_, e)| e).collect();
        if !drained.is_empty() {
            log::info!("Closing {} tunnels.", drained.len());
        }
        for entry in drained {
            entry.tunnel.close();
            self.removed(&entry.tunnel);
        }
    }
}
