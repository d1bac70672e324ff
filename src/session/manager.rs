use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use moka::future::Cache;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{Session, SessionGuard};
use crate::config::EngineConfig;
use crate::device::VendorProfile;
use crate::error::ConnectError;
use crate::protocol::CliRequest;
use crate::transport::{Connector, NetworkConnector};

type Slot = Arc<Mutex<Option<Session>>>;

/// Snapshot of one address in the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    pub address: String,
    /// Current mode, or `None` while the session is in use.
    pub mode: Option<String>,
}

/// Owns one gate and at most one session per device address.
///
/// The gate is a one-slot async mutex around the address's session slot, so
/// calls to the same address are totally ordered while distinct addresses
/// run in parallel. Gates are created on first use and never evicted, which
/// keeps a single gate per address for the manager's lifetime.
#[derive(Clone)]
pub struct SessionManager {
    gates: Cache<String, Slot>,
    connector: Arc<dyn Connector>,
    config: EngineConfig,
    next_id: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, config: EngineConfig) -> Self {
        Self {
            gates: Cache::builder().build(),
            connector,
            config,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Manager dialing real devices over SSH and Telnet.
    pub fn with_network(config: EngineConfig) -> Self {
        Self::new(Arc::new(NetworkConnector), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn gate(&self, address: &str) -> Slot {
        self.gates
            .get_with(address.to_string(), async { Arc::new(Mutex::new(None)) })
            .await
    }

    /// Takes the address gate and returns a ready session.
    ///
    /// Waits while another caller holds the gate. A usable session is rebound
    /// to `request` and `profile`; otherwise a new one is dialed and
    /// initialized in place of any stale one.
    pub async fn acquire(
        &self,
        request: &CliRequest,
        profile: Arc<dyn VendorProfile>,
    ) -> Result<SessionGuard, ConnectError> {
        let address = request.address.as_str();
        let prefix = request.prefix();
        let gate = self.gate(address).await;
        let mut guard = gate.clone().lock_owned().await;

        match guard.as_ref().map(Session::is_usable) {
            Some(true) => {
                debug!("{} Cache hit: {}", prefix, address);
                if let Some(session) = guard.as_mut() {
                    session.rebind(request, profile)?;
                }
                return Ok(SessionGuard::new(guard));
            }
            Some(false) => {
                debug!("{} Cached session {} is closed. Removing.", prefix, address);
                if let Some(mut stale) = guard.take() {
                    stale.close();
                }
            }
            None => debug!("{} Cache miss, creating new session for {}...", prefix, address),
        }

        let mut session = self.establish(request, profile).await?;
        if let Some(interval) = self.config.keepalive_interval {
            let task = spawn_keepalive(Arc::downgrade(&gate), session.id(), interval);
            session.set_keepalive(task);
        }
        info!("{} session {} to {} ready in mode {}", prefix, session.id(), address, session.mode());
        *guard = Some(session);
        Ok(SessionGuard::new(guard))
    }

    async fn establish(
        &self,
        request: &CliRequest,
        profile: Arc<dyn VendorProfile>,
    ) -> Result<Session, ConnectError> {
        let client = self.connector.dial(request, &self.config).await?;
        let shell = profile.open_shell(client, request, &self.config).await?;
        let overlay = profile.request_modes(request)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut session = Session::new(id, shell, profile, overlay, request, self.config.read_timeout);
        if let Err(err) = session.initialize(request).await {
            session.close();
            return Err(err);
        }
        Ok(session)
    }

    /// Returns the gate. Dropping the guard does the same.
    pub fn release(&self, guard: SessionGuard) {
        drop(guard);
    }

    /// Closes and forgets the session of `address`, if any. Idempotent.
    pub async fn close(&self, address: &str) {
        if let Some(gate) = self.gates.get(address).await {
            let mut slot = gate.lock().await;
            if let Some(mut session) = slot.take() {
                session.close();
            }
        }
    }

    /// Addresses that currently hold a session.
    pub async fn live_sessions(&self) -> Vec<LiveSession> {
        let mut live = Vec::new();
        for (address, gate) in self.gates.iter() {
            match gate.try_lock() {
                Ok(slot) => {
                    if let Some(session) = slot.as_ref() {
                        live.push(LiveSession {
                            address: address.to_string(),
                            mode: Some(session.mode().to_string()),
                        });
                    }
                }
                Err(_) => live.push(LiveSession {
                    address: address.to_string(),
                    mode: None,
                }),
            }
        }
        live.sort_by(|a, b| a.address.cmp(&b.address));
        live
    }

    /// Closes every session, waiting for in-flight work on each address.
    pub async fn shutdown(&self) {
        let gates: Vec<Slot> = self.gates.iter().map(|(_, gate)| gate).collect();
        for gate in gates {
            let mut slot = gate.lock().await;
            if let Some(mut session) = slot.take() {
                session.close();
            }
        }
    }
}

/// Probes an idle session every `interval` under its gate.
///
/// A failed probe closes the session and clears the slot so the next
/// acquire rebuilds it. The task ends once the slot holds another session.
fn spawn_keepalive(slot: Weak<Mutex<Option<Session>>>, id: u64, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let Some(slot) = slot.upgrade() else {
                break;
            };
            let mut guard = slot.lock().await;
            let Some(session) = guard.as_mut() else {
                break;
            };
            if session.id() != id || !session.is_usable() {
                break;
            }
            if session.last_activity().elapsed() < interval {
                continue;
            }
            if let Err(err) = session.probe().await {
                warn!(
                    "{} keep-alive for {} failed, closing session: {}",
                    session.log_prefix(),
                    session.address(),
                    err
                );
                if let Some(mut dead) = guard.take() {
                    dead.close();
                }
                break;
            }
        }
    })
}
