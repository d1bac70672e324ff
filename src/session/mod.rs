//! Device sessions and their lifecycle.
//!
//! A [`Session`] is one live interactive shell bound to a device address,
//! the vendor profile driving it, and the mode the device is believed to be
//! in. The [`SessionManager`] owns at most one session per address and hands
//! out exclusive access through a [`SessionGuard`].
//!
//! # Main Components
//!
//! - [`SessionManager`] - Per-address gate and session registry
//! - [`SessionGuard`] - Exclusive handle to one session; dropping it releases the gate
//! - [`Session`] - Shell, profile binding and mode tracking
//! - [`ReadOutcome`] - Output captured up to a prompt

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::device::{ModeOverlay, VendorProfile};
use crate::error::ConnectError;
use crate::protocol::CliRequest;
use crate::transport::Shell;

pub use engine::ReadOutcome;
pub use manager::{LiveSession, SessionManager};

mod engine;
mod manager;

/// One live shell on one device.
pub struct Session {
    id: u64,
    address: String,
    shell: Shell,
    profile: Arc<dyn VendorProfile>,
    overlay: ModeOverlay,
    mode: String,
    log_prefix: String,
    read_timeout: Duration,
    last_activity: Instant,
    /// SHA-256 over the login credentials, compared on rebind.
    credential_hash: [u8; 32],
    /// Set while a batch is in flight and left set when it does not finish
    /// cleanly; a poisoned session is never handed out again.
    poisoned: bool,
    keepalive: Option<JoinHandle<()>>,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        shell: Shell,
        profile: Arc<dyn VendorProfile>,
        overlay: ModeOverlay,
        request: &CliRequest,
        read_timeout: Duration,
    ) -> Self {
        Self {
            id,
            address: request.address.clone(),
            shell,
            mode: profile.start_mode().to_string(),
            profile,
            overlay,
            log_prefix: request.prefix().to_string(),
            read_timeout,
            last_activity: Instant::now(),
            credential_hash: credential_hash(request),
            poisoned: false,
            keepalive: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Mode the device is believed to be in.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Prefix of the request the session last served.
    pub fn log_prefix(&self) -> &str {
        &self.log_prefix
    }

    pub fn profile(&self) -> &Arc<dyn VendorProfile> {
        &self.profile
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Whether the session may serve another request.
    pub fn is_usable(&self) -> bool {
        !self.poisoned && !self.shell.is_closed()
    }

    /// Prompt patterns for `mode`, session overlay first.
    pub(crate) fn prompts(&self, mode: &str) -> Result<Vec<Regex>, ConnectError> {
        let prompts = self
            .overlay
            .prompts_for(mode)
            .or_else(|| self.profile.prompts_for(mode))
            .unwrap_or_default();
        if prompts.is_empty() {
            return Err(ConnectError::NoPromptsForMode(mode.to_string()));
        }
        Ok(prompts.to_vec())
    }

    /// Commands for the direct edge `from -> to`, session overlay first.
    pub(crate) fn transition_commands(&self, from: &str, to: &str) -> Vec<String> {
        self.overlay
            .transition_commands(from, to)
            .or_else(|| self.profile.transition_commands(from, to))
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Points a reused session at a new request and profile.
    ///
    /// Modes the new request introduces are merged into the overlay; modes
    /// from earlier requests stay so the session can still leave them.
    pub(crate) fn rebind(
        &mut self,
        request: &CliRequest,
        profile: Arc<dyn VendorProfile>,
    ) -> Result<(), ConnectError> {
        let overlay = profile.request_modes(request)?;
        let hash = credential_hash(request);
        if hash != self.credential_hash {
            warn!(
                "{} credentials for {} changed, reusing the live session",
                request.prefix(),
                self.address
            );
            self.credential_hash = hash;
        }
        self.overlay.merge(overlay);
        self.profile = profile;
        self.log_prefix = request.prefix().to_string();
        Ok(())
    }

    pub(crate) fn set_keepalive(&mut self, task: JoinHandle<()>) {
        self.keepalive = Some(task);
    }

    /// Closes the shell and stops the keep-alive task. Idempotent.
    pub fn close(&mut self) {
        debug!("{} closing session {} to {}", self.log_prefix, self.id, self.address);
        self.poisoned = true;
        self.shell.close();
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
    }
}

fn credential_hash(request: &CliRequest) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(request.auth.username.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.auth.password.as_bytes());
    hasher.update([0u8]);
    if let Some(secret) = request.enable_pwd.as_ref() {
        hasher.update(secret.as_bytes());
    }
    hasher.finalize().into()
}

/// Exclusive access to the session of one address.
///
/// Holding the guard holds the address gate. Dropping it releases the gate
/// and tears down the session if it was left poisoned or closed.
pub struct SessionGuard {
    guard: OwnedMutexGuard<Option<Session>>,
}

impl SessionGuard {
    pub(crate) fn new(guard: OwnedMutexGuard<Option<Session>>) -> Self {
        Self { guard }
    }

    pub fn session(&self) -> Option<&Session> {
        self.guard.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.guard.as_mut()
    }

    /// Runs one batch on the guarded session.
    pub async fn execute(
        &mut self,
        request: &CliRequest,
    ) -> Result<std::collections::HashMap<String, String>, ConnectError> {
        match self.guard.as_mut() {
            Some(session) => session.execute(request).await,
            None => Err(ConnectError::TransportClosed),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let discard = self.guard.as_ref().is_some_and(|s| !s.is_usable());
        if discard && let Some(mut session) = self.guard.take() {
            debug!(
                "{} session {} to {} is poisoned or closed, discarding",
                session.log_prefix, session.id, session.address
            );
            session.close();
        }
    }
}
