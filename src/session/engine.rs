use std::collections::HashMap;
use std::time::Duration;

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::Instant;

use super::Session;
use crate::device::{LOGIN, LOGIN_ENABLE, LOGIN_OR_ENABLE, first_match, last_line};
use crate::error::ConnectError;
use crate::protocol::CliRequest;

/// Carriage returns and backspaces some devices emit before redrawing a line.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );

static USERNAME_PROMPT: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"(?i)(user ?name|login)\s*:\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid USERNAME_PROMPT regex: {err}"),
    }
});

static PASSWORD_PROMPT: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"(?i)password\s*:\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid PASSWORD_PROMPT regex: {err}"),
    }
});

/// Output of a read that ended at a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Text before the prompt line, with one trailing line break removed.
    pub output: String,
    /// The prompt line that ended the read.
    pub prompt: String,
}

/// Splits `buffer` at the prompt line if its last non-empty line matches.
fn cut_at_prompt(buffer: &str, prompts: &[Regex]) -> Option<ReadOutcome> {
    let (offset, line) = last_line(buffer)?;
    let line = IGNORE_START_LINE.replace(line, "");
    first_match(prompts, &line)?;
    let before = &buffer[..offset];
    let output = before
        .strip_suffix("\r\n")
        .or_else(|| before.strip_suffix('\n'))
        .unwrap_or(before);
    Some(ReadOutcome {
        output: output.to_string(),
        prompt: line.into_owned(),
    })
}

impl Session {
    /// Reads until the last non-empty line matches a prompt of `mode`.
    ///
    /// The deadline is fixed when the call starts. `answers` pairs an
    /// interactive prompt with the text to send back when it shows up before
    /// any mode prompt. Any failure poisons the session.
    pub(crate) async fn read_until_prompt(
        &mut self,
        mode: &str,
        answers: &[(&Regex, String)],
        timeout: Duration,
    ) -> Result<ReadOutcome, ConnectError> {
        let prompts = self.prompts(mode)?;
        let deadline = Instant::now() + timeout;
        let mut buffer = String::new();

        loop {
            let chunk = match self.shell.read_chunk(deadline).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    self.poisoned = true;
                    let tail = last_line(&buffer).map(|(_, l)| l).unwrap_or_default();
                    return Err(ConnectError::ProtocolTimeout(format!(
                        "no {mode} prompt within {timeout:?}, last line {tail:?}"
                    )));
                }
                Err(err) => {
                    self.poisoned = true;
                    return Err(err);
                }
            };
            trace!("{} {:?}", self.log_prefix, chunk);
            buffer.push_str(&chunk);

            if let Some(outcome) = cut_at_prompt(&buffer, &prompts) {
                self.last_activity = Instant::now();
                return Ok(outcome);
            }

            let answer = last_line(&buffer).and_then(|(_, line)| {
                answers
                    .iter()
                    .find(|(pattern, _)| pattern.is_match(line))
                    .map(|(_, reply)| reply.clone())
            });
            if let Some(reply) = answer {
                trace!("{} input required, answering", self.log_prefix);
                buffer.clear();
                if let Err(err) = self.shell.send(reply).await {
                    self.poisoned = true;
                    return Err(err);
                }
            }
        }
    }

    /// Writes `command` plus the line break, after dropping stale output.
    async fn write_line(&mut self, command: &str) -> Result<(), ConnectError> {
        let dropped = self.shell.drain();
        if dropped > 0 {
            debug!("{} dropped {} bytes of residual output", self.log_prefix, dropped);
        }
        let line = format!("{}{}", command, self.profile.line_break());
        if let Err(err) = self.shell.send(line).await {
            self.poisoned = true;
            return Err(err);
        }
        Ok(())
    }

    /// Fails with the first output line matching an error pattern.
    fn scan_errors(&self, output: &str) -> Result<(), ConnectError> {
        let patterns = self.profile.error_patterns();
        for line in output.lines() {
            let line = line.trim_end_matches('\r');
            if patterns.iter().any(|p| p.is_match(line)) {
                return Err(ConnectError::DeviceRejected(line.to_string()));
            }
        }
        Ok(())
    }

    /// Sends one command and returns its error-checked output.
    async fn run_command(&mut self, command: &str, timeout: Duration) -> Result<String, ConnectError> {
        self.write_line(command).await?;
        let mode = self.mode.clone();
        let outcome = self.read_until_prompt(&mode, &[], timeout).await?;
        self.scan_errors(&outcome.output)?;
        Ok(outcome.output)
    }

    /// Moves to `target` along the direct edge, if one is declared.
    ///
    /// The recorded mode becomes `target` even when no commands exist.
    async fn enter_mode(&mut self, target: &str, timeout: Duration) -> Result<(), ConnectError> {
        if target.is_empty() || target == self.mode {
            return Ok(());
        }
        // The ambiguous start mode is satisfied by either privilege level.
        if target == LOGIN_OR_ENABLE && (self.mode == LOGIN || self.mode == LOGIN_ENABLE) {
            return Ok(());
        }
        // Nothing is written toward a mode whose prompt cannot be recognized.
        self.prompts(target)?;
        let commands = self.transition_commands(&self.mode, target);
        debug!(
            "{} mode {} -> {} with {} command(s)",
            self.log_prefix,
            self.mode,
            target,
            commands.len()
        );
        self.mode = target.to_string();
        for command in commands {
            self.run_command(&command, timeout).await?;
        }
        Ok(())
    }

    /// Runs a request's mode transition and commands.
    ///
    /// Outputs are keyed by the literal command; a repeated command keeps the
    /// last output. The first failure stops the batch.
    pub async fn execute(&mut self, request: &CliRequest) -> Result<HashMap<String, String>, ConnectError> {
        let timeout = request.read_timeout(self.read_timeout);
        self.poisoned = true;
        let result = self.run_batch(request, timeout).await;
        self.last_activity = Instant::now();
        match &result {
            Ok(_) => self.poisoned = false,
            Err(err) if !err.invalidates_session() => self.poisoned = false,
            Err(err) => debug!("{} batch failed, session poisoned: {}", self.log_prefix, err),
        }
        result
    }

    async fn run_batch(
        &mut self,
        request: &CliRequest,
        timeout: Duration,
    ) -> Result<HashMap<String, String>, ConnectError> {
        self.enter_mode(&request.mode, timeout).await?;
        let mut outputs = HashMap::with_capacity(request.commands.len());
        for command in &request.commands {
            debug!("{} exec: {}", self.log_prefix, command);
            let output = self.run_command(command, timeout).await?;
            outputs.insert(command.clone(), output);
        }
        Ok(outputs)
    }

    /// Brings a freshly opened shell to an idle, classified prompt.
    ///
    /// Answers login prompts, escalates out of the ambiguous start mode when
    /// the request needs privilege, then runs the profile's normalization.
    pub(crate) async fn initialize(&mut self, request: &CliRequest) -> Result<(), ConnectError> {
        let timeout = request.read_timeout(self.read_timeout);
        let lb = self.profile.line_break().to_string();
        let answers = [
            (&*USERNAME_PROMPT, format!("{}{}", request.auth.username, lb)),
            (&*PASSWORD_PROMPT, format!("{}{}", request.auth.password, lb)),
        ];

        let start = self.profile.start_mode().to_string();
        self.mode = start.clone();
        let first = self.read_until_prompt(&start, &answers, timeout).await?;
        debug!("{} first prompt {:?}", self.log_prefix, first.prompt);

        if start == LOGIN_OR_ENABLE {
            let login = self.prompts(LOGIN)?;
            if first_match(&login, &first.prompt).is_some() {
                if request.mode == LOGIN {
                    self.mode = LOGIN.to_string();
                } else {
                    debug!("{} escalating with enable", self.log_prefix);
                    self.mode = LOGIN_ENABLE.to_string();
                    let secret = request.enable_pwd.as_deref().unwrap_or_default();
                    self.write_line(&format!("enable{lb}{secret}")).await?;
                    self.read_until_prompt(LOGIN_ENABLE, &[], timeout).await?;
                }
            } else {
                self.mode = LOGIN_ENABLE.to_string();
            }
        }

        for step in self.profile.normalize_steps(request) {
            if let Some(mode) = step.mode {
                self.mode = mode;
            }
            self.write_line(&step.command).await?;
            let mode = self.mode.clone();
            self.read_until_prompt(&mode, &[], timeout).await?;
        }
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Round trip of a bare line break, proving the shell still answers.
    pub(crate) async fn probe(&mut self) -> Result<(), ConnectError> {
        let timeout = self.read_timeout;
        self.write_line("").await?;
        let mode = self.mode.clone();
        self.read_until_prompt(&mode, &[], timeout).await?;
        Ok(())
    }
}
