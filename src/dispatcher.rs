//! Request entry point: resolve, acquire, execute, respond.

use std::sync::Arc;

use log::{debug, error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ConnectError, RetCode};
use crate::protocol::{CliRequest, CliResponse};
use crate::registry::ProfileRegistry;
use crate::session::SessionManager;
use crate::templates;

/// Turns [`CliRequest`]s into [`CliResponse`]s.
///
/// Cheap to clone; clones share the registry and the session manager.
#[derive(Clone)]
pub struct RequestDispatcher {
    registry: Arc<ProfileRegistry>,
    sessions: SessionManager,
}

impl RequestDispatcher {
    pub fn new(registry: Arc<ProfileRegistry>, sessions: SessionManager) -> Self {
        Self { registry, sessions }
    }

    /// Dispatcher over the built-in templates dialing real devices.
    pub fn with_builtin_profiles(config: EngineConfig) -> Result<Self, ConnectError> {
        let registry = templates::builtin_registry()?;
        Ok(Self::new(
            Arc::new(registry),
            SessionManager::with_network(config),
        ))
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    fn config(&self) -> &EngineConfig {
        self.sessions.config()
    }

    /// Fills the correlation id and log prefix when absent.
    fn fill_defaults(&self, request: &mut CliRequest) {
        let session = request
            .session
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        if request.log_prefix.as_deref().is_none_or(str::is_empty) {
            request.log_prefix = Some(format!("[ {} ] [ {} ]", request.device, session));
        }
    }

    /// Handles one request. Every outcome, including failures, is a response.
    ///
    /// The whole call is bounded by the request deadline; when it expires the
    /// in-flight work is dropped, which releases the gate and discards the
    /// half-used session.
    pub async fn handle(&self, mut request: CliRequest) -> CliResponse {
        self.fill_defaults(&mut request);
        let deadline = request.request_deadline(self.config().read_timeout);
        info!(
            "{} handling {} command(s) for {} at {}",
            request.prefix(),
            request.commands.len(),
            request.identity(),
            request.address
        );

        match tokio::time::timeout(deadline, self.run(&mut request)).await {
            Ok(response) => response,
            Err(_) => {
                error!("{} handle req timeout after {:?}", request.prefix(), deadline);
                CliResponse::failure(RetCode::Timeout, &request.device, "handle req timeout")
            }
        }
    }

    async fn run(&self, request: &mut CliRequest) -> CliResponse {
        let identity = request.identity();
        let profile = match self.registry.resolve(&identity) {
            Ok(profile) => profile,
            Err(err) => {
                error!("{} {}", request.prefix(), err);
                return CliResponse::failure(
                    err.code(),
                    &request.device,
                    format!("no operator match {identity}"),
                );
            }
        };
        debug!("{} resolved {} to {}", request.prefix(), identity, profile.name());
        if request.mode.is_empty() {
            request.mode = profile.start_mode().to_string();
        }

        let mut guard = match self.sessions.acquire(request, profile).await {
            Ok(guard) => guard,
            Err(err) => {
                error!("{} acquire cli conn fail, {}", request.prefix(), err);
                return CliResponse::failure(
                    RetCode::AcquireFailed,
                    &request.device,
                    format!("acquire cli conn fail, {err}"),
                );
            }
        };

        let result = guard.execute(request).await;
        self.sessions.release(guard);

        match result {
            Ok(outputs) => {
                info!("{} {} command(s) done", request.prefix(), outputs.len());
                CliResponse::ok(&request.device, outputs)
            }
            Err(err) => {
                error!("{} exec cli cmds fail, {}", request.prefix(), err);
                CliResponse::failure(
                    err.code(),
                    &request.device,
                    format!("exec cli cmds fail, {err}"),
                )
            }
        }
    }
}
