//! Vendor profiles: the per-family description of a device CLI.
//!
//! A profile tells the engine which prompts mean "idle in mode M", which
//! literal commands move directly between two modes, which output lines are
//! in-band errors, and how to open a shell on a freshly dialed transport.
//!
//! [`VendorProfile`] is the capability every vendor family implements.
//! [`DeviceProfile`] is the table-driven implementation used by all built-in
//! templates; families needing code hooks can implement the trait directly.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use log::trace;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::ConnectError;
use crate::protocol::CliRequest;
use crate::transport::{Shell, TransportClient};

/// Start mode of devices that may land either unprivileged or privileged.
pub const LOGIN_OR_ENABLE: &str = "login_or_login_enable";

/// Unprivileged exec mode.
pub const LOGIN: &str = "login";

/// Privileged exec mode reached with `enable`.
pub const LOGIN_ENABLE: &str = "login_enable";

/// Pseudo-terminal parameters requested before the shell starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub width: u32,
    pub height: u32,
    pub echo: bool,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "vt100".to_string(),
            width: 2000,
            height: 0,
            echo: true,
        }
    }
}

/// One command run while a new session is being normalized.
///
/// `mode` names the mode whose prompt ends the read; `None` uses the
/// session's current mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStep {
    pub command: String,
    pub mode: Option<String>,
}

impl SessionStep {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            mode: None,
        }
    }

    pub fn in_mode(command: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            mode: Some(mode.into()),
        }
    }
}

/// Modes, prompts and transitions that only exist for one session.
///
/// Lookups consult the overlay before the shared profile, so a session can
/// learn request-specific contexts without mutating state other sessions see.
#[derive(Debug, Clone, Default)]
pub struct ModeOverlay {
    prompts: HashMap<String, Vec<Regex>>,
    transitions: HashMap<(String, String), Vec<String>>,
}

impl ModeOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompts(mut self, mode: impl Into<String>, prompts: Vec<Regex>) -> Self {
        self.prompts.insert(mode.into(), prompts);
        self
    }

    pub fn with_transition<I, S>(mut self, from: &str, to: &str, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transitions.insert(
            (from.to_string(), to.to_string()),
            commands.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn prompts_for(&self, mode: &str) -> Option<&[Regex]> {
        self.prompts.get(mode).map(Vec::as_slice)
    }

    pub fn transition_commands(&self, from: &str, to: &str) -> Option<&[String]> {
        self.transitions
            .get(&(from.to_string(), to.to_string()))
            .map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty() && self.transitions.is_empty()
    }

    /// Adds `other`'s entries, replacing any with the same key.
    pub fn merge(&mut self, other: ModeOverlay) {
        self.prompts.extend(other.prompts);
        self.transitions.extend(other.transitions);
    }
}

/// Capability interface implemented once per vendor family.
#[async_trait]
pub trait VendorProfile: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Prompt patterns meaning the session is idle in `mode`.
    fn prompts_for(&self, mode: &str) -> Option<&[Regex]>;

    /// Commands for the direct edge `from -> to`. No graph search is done.
    fn transition_commands(&self, from: &str, to: &str) -> Option<&[String]>;

    /// Patterns that mark a line of command output as a device-side error.
    fn error_patterns(&self) -> &[Regex];

    fn line_break(&self) -> &str;

    fn start_mode(&self) -> &str;

    /// Pseudo-terminal to request when opening an SSH shell.
    fn pty(&self) -> Option<&PtyRequest> {
        None
    }

    /// Request-specific modes layered over this profile for one session.
    fn request_modes(&self, _request: &CliRequest) -> Result<ModeOverlay, ConnectError> {
        Ok(ModeOverlay::default())
    }

    /// Commands that bring a new session to a predictable idle state.
    fn normalize_steps(&self, _request: &CliRequest) -> Vec<SessionStep> {
        Vec::new()
    }

    /// Opens the interactive shell on a dialed transport.
    async fn open_shell(
        &self,
        client: TransportClient,
        _request: &CliRequest,
        config: &EngineConfig,
    ) -> Result<Shell, ConnectError> {
        client.into_shell(self.pty(), config.channel_capacity).await
    }
}

/// Request modes a device names after user-supplied contexts.
///
/// A request mode the profile does not declare is treated as a context name:
/// `{context}` in the prompt pattern is replaced by the escaped name and in
/// the commands by the literal name.
#[derive(Debug, Clone)]
pub struct ContextModes {
    pub base_mode: String,
    pub prompt: String,
    pub enter: Vec<String>,
    pub leave: Vec<String>,
    /// Global context wrapped around normalization when a context is targeted:
    /// (mode, enter command, leave command).
    pub global: Option<(String, String, String)>,
}

/// Summary of structural issues in a profile's tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProfileDiagnostics {
    pub total_modes: usize,
    /// Declared modes with an empty prompt list.
    pub modes_without_prompts: Vec<String>,
    /// Transition sources that are not declared modes.
    pub missing_edge_sources: Vec<String>,
    /// Transition targets that are not declared modes.
    pub missing_edge_targets: Vec<String>,
    /// Modes no direct-edge chain reaches from the start mode.
    pub unreachable_modes: Vec<String>,
    /// Prompt patterns shared by several modes.
    pub duplicate_prompt_patterns: Vec<String>,
}

impl ProfileDiagnostics {
    /// Returns true when the profile cannot work as declared.
    ///
    /// Shared prompts and unreachable modes are informational: several
    /// vendors reuse one prompt for different configure flavours.
    pub fn has_issues(&self) -> bool {
        !self.modes_without_prompts.is_empty()
            || !self.missing_edge_sources.is_empty()
            || !self.missing_edge_targets.is_empty()
    }
}

/// Table-driven vendor profile.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    name: String,
    /// Declared modes in declaration order.
    modes: Vec<String>,
    prompts: HashMap<String, Vec<Regex>>,
    transitions: HashMap<(String, String), Vec<String>>,
    errors: Vec<Regex>,
    line_break: String,
    start_mode: String,
    pty: Option<PtyRequest>,
    normalize: Vec<SessionStep>,
    format_command: Option<String>,
    context: Option<ContextModes>,
}

fn compile(patterns: impl IntoIterator<Item = impl AsRef<str>>, what: &str) -> Result<Vec<Regex>, ConnectError> {
    patterns
        .into_iter()
        .map(|p| {
            Regex::new(p.as_ref()).map_err(|err| {
                ConnectError::InvalidProfile(format!("invalid {what} regex '{}': {err}", p.as_ref()))
            })
        })
        .collect()
}

impl DeviceProfile {
    /// Starts a profile with `\n` line breaks and `login` as start mode.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modes: Vec::new(),
            prompts: HashMap::new(),
            transitions: HashMap::new(),
            errors: Vec::new(),
            line_break: "\n".to_string(),
            start_mode: LOGIN.to_string(),
            pty: None,
            normalize: Vec::new(),
            format_command: None,
            context: None,
        }
    }

    /// Declares a mode with its prompt patterns.
    pub fn with_mode<I, S>(mut self, mode: &str, prompts: I) -> Result<Self, ConnectError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = compile(prompts, &format!("prompt for mode '{mode}'"))?;
        if !self.modes.iter().any(|m| m == mode) {
            self.modes.push(mode.to_string());
        }
        self.prompts.insert(mode.to_string(), compiled);
        Ok(self)
    }

    /// Declares the direct edge `from -> to`.
    pub fn with_transition<I, S>(mut self, from: &str, to: &str, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transitions.insert(
            (from.to_string(), to.to_string()),
            commands.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_error_patterns<I, S>(mut self, patterns: I) -> Result<Self, ConnectError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.errors.extend(compile(patterns, "error")?);
        Ok(self)
    }

    pub fn with_line_break(mut self, line_break: impl Into<String>) -> Self {
        self.line_break = line_break.into();
        self
    }

    pub fn with_start_mode(mut self, mode: impl Into<String>) -> Self {
        self.start_mode = mode.into();
        self
    }

    pub fn with_pty(mut self, pty: PtyRequest) -> Self {
        self.pty = Some(pty);
        self
    }

    /// Adds an idle-normalization command (paging off and the like).
    pub fn with_normalize_step(mut self, step: SessionStep) -> Self {
        self.normalize.push(step);
        self
    }

    /// Command template run first during normalization when the request
    /// carries a format hint; `{format}` is replaced by the hint.
    pub fn with_format_command(mut self, template: impl Into<String>) -> Self {
        self.format_command = Some(template.into());
        self
    }

    pub fn with_context_modes(mut self, context: ContextModes) -> Result<Self, ConnectError> {
        // Validate the template once with a placeholder context name.
        let probe = context.prompt.replace("{context}", "probe");
        Regex::new(&probe).map_err(|err| {
            ConnectError::InvalidProfile(format!("invalid context prompt '{}': {err}", context.prompt))
        })?;
        self.context = Some(context);
        Ok(self)
    }

    /// Rejects the profile when [`DeviceProfile::diagnose`] finds issues.
    pub fn validate(self) -> Result<Self, ConnectError> {
        let report = self.diagnose();
        if report.has_issues() {
            return Err(ConnectError::InvalidProfile(format!(
                "{}: modes without prompts {:?}, undeclared edge sources {:?}, undeclared edge targets {:?}",
                self.name,
                report.modes_without_prompts,
                report.missing_edge_sources,
                report.missing_edge_targets
            )));
        }
        Ok(self)
    }

    /// Declared mode names in declaration order.
    pub fn modes(&self) -> &[String] {
        &self.modes
    }

    fn is_context_mode(&self, mode: &str) -> bool {
        self.context.is_some() && !mode.is_empty() && !self.prompts.contains_key(mode)
    }

    /// Reports structural problems in the tables.
    pub fn diagnose(&self) -> ProfileDiagnostics {
        let declared: HashSet<&str> = self.modes.iter().map(String::as_str).collect();

        let mut modes_without_prompts = self
            .modes
            .iter()
            .filter(|m| self.prompts.get(*m).is_none_or(|p| p.is_empty()))
            .cloned()
            .collect::<Vec<_>>();
        modes_without_prompts.sort();

        let mut missing_edge_sources = HashSet::new();
        let mut missing_edge_targets = HashSet::new();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for (from, to) in self.transitions.keys() {
            if !declared.contains(from.as_str()) {
                missing_edge_sources.insert(from.clone());
            }
            if !declared.contains(to.as_str()) {
                missing_edge_targets.insert(to.clone());
            }
            adjacency.entry(from.as_str()).or_default().push(to.as_str());
        }

        // The ambiguous start mode resolves to either privilege level.
        let mut seeds = vec![self.start_mode.as_str()];
        if self.start_mode == LOGIN_OR_ENABLE {
            seeds.extend([LOGIN, LOGIN_ENABLE]);
        }
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for seed in seeds {
            if reachable.insert(seed) {
                queue.push_back(seed);
            }
        }
        while let Some(node) = queue.pop_front() {
            for &next in adjacency.get(node).into_iter().flatten() {
                if reachable.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        let mut unreachable_modes = self
            .modes
            .iter()
            .filter(|m| !reachable.contains(m.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        unreachable_modes.sort();

        let mut by_pattern: HashMap<&str, Vec<&str>> = HashMap::new();
        for mode in &self.modes {
            for regex in self.prompts.get(mode).into_iter().flatten() {
                by_pattern.entry(regex.as_str()).or_default().push(mode.as_str());
            }
        }
        let mut duplicate_prompt_patterns = by_pattern
            .into_iter()
            .filter(|(_, modes)| modes.len() > 1)
            .map(|(pattern, mut modes)| {
                modes.sort();
                format!("{pattern} => {}", modes.join(","))
            })
            .collect::<Vec<_>>();
        duplicate_prompt_patterns.sort();

        let mut missing_edge_sources = missing_edge_sources.into_iter().collect::<Vec<_>>();
        missing_edge_sources.sort();
        let mut missing_edge_targets = missing_edge_targets.into_iter().collect::<Vec<_>>();
        missing_edge_targets.sort();

        ProfileDiagnostics {
            total_modes: self.modes.len(),
            modes_without_prompts,
            missing_edge_sources,
            missing_edge_targets,
            unreachable_modes,
            duplicate_prompt_patterns,
        }
    }
}

#[async_trait]
impl VendorProfile for DeviceProfile {
    fn name(&self) -> &str {
        &self.name
    }

    fn prompts_for(&self, mode: &str) -> Option<&[Regex]> {
        self.prompts.get(mode).map(Vec::as_slice)
    }

    fn transition_commands(&self, from: &str, to: &str) -> Option<&[String]> {
        self.transitions
            .get(&(from.to_string(), to.to_string()))
            .map(Vec::as_slice)
    }

    fn error_patterns(&self) -> &[Regex] {
        &self.errors
    }

    fn line_break(&self) -> &str {
        &self.line_break
    }

    fn start_mode(&self) -> &str {
        &self.start_mode
    }

    fn pty(&self) -> Option<&PtyRequest> {
        self.pty.as_ref()
    }

    fn request_modes(&self, request: &CliRequest) -> Result<ModeOverlay, ConnectError> {
        let Some(context) = self.context.as_ref() else {
            return Ok(ModeOverlay::default());
        };
        if !self.is_context_mode(&request.mode) {
            return Ok(ModeOverlay::default());
        }
        let name = request.mode.as_str();
        trace!("{} context mode '{}' for {}", request.prefix(), name, self.name);
        let prompt = Regex::new(&context.prompt.replace("{context}", &regex::escape(name)))?;
        let fill = |cmds: &[String]| {
            cmds.iter()
                .map(|c| c.replace("{context}", name))
                .collect::<Vec<_>>()
        };
        Ok(ModeOverlay::new()
            .with_prompts(name, vec![prompt])
            .with_transition(&context.base_mode, name, fill(&context.enter))
            .with_transition(name, &context.base_mode, fill(&context.leave)))
    }

    fn normalize_steps(&self, request: &CliRequest) -> Vec<SessionStep> {
        let mut steps = Vec::new();
        let format = request.format.as_deref().filter(|f| !f.is_empty());
        if let (Some(template), Some(format)) = (self.format_command.as_ref(), format) {
            steps.push(SessionStep::new(template.replace("{format}", format)));
        }

        let global = self
            .context
            .as_ref()
            .and_then(|c| c.global.as_ref().map(|g| (c, g)))
            .filter(|_| self.is_context_mode(&request.mode));
        match global {
            Some((context, (mode, enter, leave))) => {
                steps.push(SessionStep::in_mode(enter.clone(), mode.clone()));
                steps.extend(self.normalize.iter().map(|step| SessionStep {
                    command: step.command.clone(),
                    mode: Some(step.mode.clone().unwrap_or_else(|| mode.clone())),
                }));
                steps.push(SessionStep::in_mode(leave.clone(), context.base_mode.clone()));
            }
            None => steps.extend(self.normalize.iter().cloned()),
        }
        steps
    }
}

/// Returns the byte offset and text of the last non-empty line.
///
/// Lines split on `\n`; one trailing `\r` is dropped from the returned text.
pub fn last_line(text: &str) -> Option<(usize, &str)> {
    let mut offset = text.len();
    for line in text.rsplit('\n') {
        offset -= line.len();
        let trimmed = line.strip_suffix('\r').unwrap_or(line);
        if !trimmed.is_empty() {
            return Some((offset, trimmed));
        }
        offset = offset.saturating_sub(1);
    }
    None
}

/// First pattern match within `line`, in pattern order.
pub fn first_match<'t>(patterns: &[Regex], line: &'t str) -> Option<regex::Match<'t>> {
    patterns.iter().find_map(|p| p.find(line))
}
