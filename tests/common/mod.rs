#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netcli::config::EngineConfig;
use netcli::device::{DeviceProfile, VendorProfile};
use netcli::dispatcher::RequestDispatcher;
use netcli::error::ConnectError;
use netcli::protocol::{Auth, CliRequest};
use netcli::registry::ProfileRegistry;
use netcli::session::SessionManager;
use netcli::transport::{Connector, Shell, ShellPeer, TransportClient};

#[derive(Clone)]
struct Reply {
    output: String,
    prompt: Option<String>,
}

/// Scripted device answering known commands and ignoring the rest.
///
/// Writes are recorded line by line. An empty line is answered with the
/// current prompt; an unknown command gets no answer at all.
#[derive(Clone)]
pub struct FakeDevice {
    banner: String,
    prompt: String,
    replies: HashMap<String, Vec<Reply>>,
    delays: HashMap<String, Duration>,
}

impl FakeDevice {
    pub fn new(prompt: &str) -> Self {
        Self {
            banner: prompt.to_string(),
            prompt: prompt.to_string(),
            replies: HashMap::new(),
            delays: HashMap::new(),
        }
    }

    /// Text sent on connect instead of the bare prompt.
    pub fn banner(mut self, banner: &str) -> Self {
        self.banner = banner.to_string();
        self
    }

    /// Adds an answer for `command`; repeated calls queue further answers.
    pub fn reply(mut self, command: &str, output: &str) -> Self {
        self.replies
            .entry(command.to_string())
            .or_default()
            .push(Reply {
                output: output.to_string(),
                prompt: None,
            });
        self
    }

    /// Answers `command` and switches to `prompt` afterwards.
    pub fn reply_then(mut self, command: &str, output: &str, prompt: &str) -> Self {
        self.replies
            .entry(command.to_string())
            .or_default()
            .push(Reply {
                output: output.to_string(),
                prompt: Some(prompt.to_string()),
            });
        self
    }

    pub fn delay(mut self, command: &str, delay: Duration) -> Self {
        self.delays.insert(command.to_string(), delay);
        self
    }

    fn spawn(&self, mut peer: ShellPeer, writes: Arc<Mutex<Vec<String>>>, dead: Arc<AtomicBool>) {
        let device = self.clone();
        tokio::spawn(async move {
            let mut prompt = device.prompt.clone();
            let mut seen: HashMap<String, usize> = HashMap::new();
            if peer.to_session.send(device.banner.clone()).await.is_err() {
                return;
            }
            while let Some(data) = peer.from_session.recv().await {
                for line in data.split_terminator('\n') {
                    writes.lock().expect("writes lock").push(line.to_string());
                    if dead.load(Ordering::SeqCst) {
                        continue;
                    }
                    if let Some(delay) = device.delays.get(line) {
                        tokio::time::sleep(*delay).await;
                    }
                    let answer = if line.is_empty() {
                        Some(Reply {
                            output: String::new(),
                            prompt: None,
                        })
                    } else {
                        device.replies.get(line).map(|replies| {
                            let n = seen.entry(line.to_string()).or_default();
                            let reply = replies[(*n).min(replies.len() - 1)].clone();
                            *n += 1;
                            reply
                        })
                    };
                    let Some(reply) = answer else {
                        continue;
                    };
                    if let Some(next) = reply.prompt {
                        prompt = next;
                    }
                    if !reply.output.is_empty()
                        && peer.to_session.send(format!("{}\n", reply.output)).await.is_err()
                    {
                        return;
                    }
                    if peer.to_session.send(prompt.clone()).await.is_err() {
                        return;
                    }
                }
            }
        });
    }
}

/// Connector handing out in-process shells backed by a [`FakeDevice`].
pub struct FakeConnector {
    device: FakeDevice,
    refuse: bool,
    dials: AtomicUsize,
    writes: Arc<Mutex<Vec<String>>>,
    dead: Arc<AtomicBool>,
}

impl FakeConnector {
    pub fn new(device: FakeDevice) -> Arc<Self> {
        Arc::new(Self {
            device,
            refuse: false,
            dials: AtomicUsize::new(0),
            writes: Arc::new(Mutex::new(Vec::new())),
            dead: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Connector whose every dial fails.
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            device: FakeDevice::new("x> "),
            refuse: true,
            dials: AtomicUsize::new(0),
            writes: Arc::new(Mutex::new(Vec::new())),
            dead: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Every line written to any shell, in arrival order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }

    /// Makes every device stop answering.
    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn dial(
        &self,
        request: &CliRequest,
        _config: &EngineConfig,
    ) -> Result<TransportClient, ConnectError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(ConnectError::ConnectFailure(format!(
                "connection refused by {}",
                request.address
            )));
        }
        let (shell, peer) = Shell::pair(64);
        self.device.spawn(peer, self.writes.clone(), self.dead.clone());
        Ok(TransportClient::Shell(shell))
    }
}

/// Engine settings for tests: no keep-alive, 5 s reads.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        keepalive_interval: None,
        ..EngineConfig::default()
    }
}

/// Two-mode device: `login` (`> `) and `enabled` (`# `), plus a `diag`
/// mode sharing the enabled prompt with no transitions into it.
pub fn alpha_profile() -> DeviceProfile {
    DeviceProfile::new("alpha")
        .with_mode("login", [r"> $"])
        .and_then(|p| p.with_mode("enabled", [r"# $"]))
        .and_then(|p| p.with_mode("diag", [r"# $"]))
        .and_then(|p| p.with_error_patterns([r"^ERROR:"]))
        .expect("alpha profile")
        .with_start_mode("login")
        .with_transition("login", "enabled", ["enable"])
}

/// Device answering the alpha profile's commands.
pub fn alpha_device() -> FakeDevice {
    FakeDevice::new("user> ")
        .reply_then("enable", "", "user# ")
        .reply("show x", "result")
}

pub fn dispatcher_with(
    connector: Arc<FakeConnector>,
    pattern: &str,
    profile: Arc<dyn VendorProfile>,
    config: EngineConfig,
) -> RequestDispatcher {
    let mut registry = ProfileRegistry::new();
    registry.register(pattern, profile).expect("register profile");
    RequestDispatcher::new(Arc::new(registry), SessionManager::new(connector, config))
}

pub fn alpha_dispatcher(connector: Arc<FakeConnector>) -> RequestDispatcher {
    dispatcher_with(
        connector,
        r"(?i)acme\.alpha\..*",
        Arc::new(alpha_profile()),
        test_config(),
    )
}

pub fn alpha_request(mode: &str, commands: &[&str]) -> CliRequest {
    CliRequest {
        vendor: "acme".to_string(),
        device_type: "alpha".to_string(),
        version: "1.0".to_string(),
        device: "alpha-1".to_string(),
        mode: mode.to_string(),
        address: "10.0.0.1:22".to_string(),
        auth: Auth {
            username: "admin".to_string(),
            password: "pw".to_string(),
        },
        commands: commands.iter().map(|c| c.to_string()).collect(),
        ..Default::default()
    }
}
