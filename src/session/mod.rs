//! Interactive device session: probe, prologue, command execution.
//!
//! One session per device per job. The session owns the transport, the
//! sanitizing output buffer, and the prompt detector with its single
//! aggregate-prompt counter. All waits observe the cancel token.

use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::cancel::CancelToken;
use crate::channel::{OutputBuffer, PromptDetector};
use crate::error::{SessionError, TransportError};
use crate::sanitize;
use crate::transport::{SshConfig, SshTransport};

/// Tunables for session timing and ceilings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the read side drains the channel.
    pub drain_interval: Duration,

    /// Quiet interval required before probe adopts a prompt.
    pub probe_quiet: Duration,

    /// Overall probe deadline.
    pub probe_timeout: Duration,

    /// Ceiling on accumulated output bytes for one session.
    pub max_output: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_millis(250),
            probe_quiet: Duration::from_millis(400),
            probe_timeout: Duration::from_secs(10),
            max_output: 16 * 1024 * 1024,
        }
    }
}

/// An open interactive session against one device.
pub struct DeviceSession {
    transport: SshTransport,
    buffer: OutputBuffer,
    detector: PromptDetector,
    config: SessionConfig,
    host: String,
}

impl DeviceSession {
    /// Connect and open the shell channel. The prompt is not yet known;
    /// call [`probe_prompt`](Self::probe_prompt) next.
    pub async fn open(ssh: SshConfig, config: SessionConfig) -> Result<Self, TransportError> {
        let host = ssh.host.clone();
        let transport = SshTransport::connect(ssh).await?;
        Ok(Self {
            transport,
            buffer: OutputBuffer::new(config.max_output),
            detector: PromptDetector::new(),
            config,
            host,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The prompt adopted by the last probe, empty before probing.
    pub fn observed_prompt(&self) -> &str {
        self.detector.expected()
    }

    /// Probe the device for its prompt.
    ///
    /// Sends a bare newline, then reads until the channel has been quiet for
    /// the configured interval; the last prompt-shaped line is adopted. The
    /// buffer is reset to exactly one prompt occurrence so the aggregate
    /// count starts from a known state.
    pub async fn probe_prompt(&mut self, cancel: &CancelToken) -> Result<String, SessionError> {
        self.send_line("").await?;

        let started = Instant::now();
        let mut last_data = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled {
                    host: self.host.clone(),
                });
            }
            if started.elapsed() >= self.config.probe_timeout {
                return Err(self.prompt_timeout(started.elapsed()));
            }

            match self.read_step().await? {
                Some(data) => {
                    self.extend(&data)?;
                    last_data = Instant::now();
                }
                None => {
                    if last_data.elapsed() >= self.config.probe_quiet && !self.buffer.is_empty() {
                        let text = self.buffer.as_str_lossy().into_owned();
                        if let Some(prompt) = PromptDetector::probe(&text) {
                            debug!("{}: adopted prompt {:?}", self.host, prompt);
                            self.detector.adopt(prompt.clone());
                            self.buffer.clear();
                            self.buffer.extend(prompt.as_bytes());
                            return Ok(prompt);
                        }
                    }
                }
            }
        }
    }

    /// Forget the adopted prompt and probe again. Needed after commands
    /// that rewrite the prompt (privilege elevation, hostname change).
    pub async fn reprobe(&mut self, cancel: &CancelToken) -> Result<String, SessionError> {
        self.detector.reprobe();
        self.buffer.clear();
        self.probe_prompt(cancel).await
    }

    /// Escalate privilege ("enable" style).
    ///
    /// Sends the elevation command, answers the secondary password prompt
    /// when the device asks (`auth_marker` is matched case-insensitively
    /// against the tail, e.g. `assword:`), and re-probes: elevation usually
    /// rewrites the prompt, so the adopted one is stale afterwards.
    /// Returns the newly adopted prompt.
    pub async fn elevate(
        &mut self,
        command: &str,
        auth_marker: &str,
        password: &str,
        per_cmd: Duration,
        cancel: &CancelToken,
    ) -> Result<String, SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled {
                host: self.host.clone(),
            });
        }

        let start_offset = self.buffer.len();
        let started = Instant::now();
        let mut last_data = Instant::now();
        let mut answered = false;

        self.send_line(command).await?;
        self.detector.command_issued();

        loop {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled {
                    host: self.host.clone(),
                });
            }

            if let Some(data) = self.read_step().await? {
                self.extend(&data)?;
                last_data = Instant::now();
            }

            let tail = String::from_utf8_lossy(&self.buffer.as_slice()[start_offset..])
                .to_lowercase();
            if !answered && tail.trim_end().ends_with(auth_marker) {
                debug!("{}: answering elevation password prompt", self.host);
                self.send_line(password).await?;
                answered = true;
                last_data = Instant::now();
                continue;
            }

            // Settled: either the new prompt is out or the device refused.
            // Devices that elevate without asking for a password settle the
            // same way.
            if last_data.elapsed() >= self.config.probe_quiet {
                break;
            }
            if started.elapsed() >= per_cmd {
                return Err(self.prompt_timeout(started.elapsed()));
            }
        }

        self.reprobe(cancel).await
    }

    /// Issue the prologue commands one at a time, waiting for the prompt
    /// between each. `failure_markers` is empty for the generic prologue,
    /// where rejections from the wrong vendors are expected and harmless.
    pub async fn run_prologue(
        &mut self,
        commands: &[String],
        failure_markers: &[String],
        per_cmd: Duration,
        cancel: &CancelToken,
    ) -> Result<(), SessionError> {
        for command in commands {
            let output = self.execute(command, per_cmd, cancel).await?;
            if let Some(marker) = failure_markers.iter().find(|m| output.contains(m.as_str())) {
                return Err(SessionError::Prologue {
                    host: self.host.clone(),
                    command: command.clone(),
                    message: marker.clone(),
                });
            }
        }
        Ok(())
    }

    /// Execute one command and return its sanitized output, with the echoed
    /// command line and trailing prompt removed and a final newline
    /// normalized.
    pub async fn execute(
        &mut self,
        command: &str,
        per_cmd: Duration,
        cancel: &CancelToken,
    ) -> Result<String, SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled {
                host: self.host.clone(),
            });
        }

        let start_offset = self.buffer.len();
        let started = Instant::now();

        self.send_line(command).await?;
        self.detector.command_issued();
        trace!(
            "{}: sent command {} ({} issued)",
            self.host,
            command,
            self.detector.commands_issued()
        );

        loop {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled {
                    host: self.host.clone(),
                });
            }

            if let Some(data) = self.read_step().await? {
                self.extend(&data)?;
            }

            // The buffer tail is the previous prompt until the command echo
            // arrives; completion checks only start once new bytes exist.
            if self.buffer.len() > start_offset && self.detector.check(&self.buffer).found {
                break;
            }

            if started.elapsed() >= per_cmd {
                return Err(self.prompt_timeout(started.elapsed()));
            }
        }

        let text = String::from_utf8_lossy(&self.buffer.as_slice()[start_offset..]).into_owned();
        Ok(normalize_output(&text, command, self.detector.expected()))
    }

    /// Execute a command sequence in order, concatenating outputs.
    pub async fn execute_all(
        &mut self,
        commands: &[String],
        per_cmd: Duration,
        cancel: &CancelToken,
    ) -> Result<String, SessionError> {
        let mut combined = String::new();
        for command in commands {
            let output = self.execute(command, per_cmd, cancel).await?;
            combined.push_str(&output);
        }
        Ok(combined)
    }

    /// Close the session. Safe on every exit path; protocol errors from a
    /// dead peer are swallowed.
    pub async fn close(self) {
        self.transport.close().await;
    }

    async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        self.transport
            .send_line(line)
            .await
            .map_err(|e| SessionError::Write {
                host: self.host.clone(),
                message: e.to_string(),
            })
    }

    async fn read_step(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        self.transport
            .read_step(self.config.drain_interval)
            .await
            .map_err(|e| SessionError::Read {
                host: self.host.clone(),
                message: e.to_string(),
            })
    }

    fn extend(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if !self.buffer.extend(data) {
            return Err(SessionError::OutputTooLarge {
                host: self.host.clone(),
                limit: self.buffer.max_len(),
            });
        }
        Ok(())
    }

    fn prompt_timeout(&self, elapsed: Duration) -> SessionError {
        let text = self.buffer.as_str_lossy();
        let tail: String = text
            .chars()
            .rev()
            .take(120)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        SessionError::PromptTimeout {
            host: self.host.clone(),
            elapsed,
            tail,
        }
    }
}

/// Strip the echoed command line and trailing prompt from raw output.
///
/// Pure so the transformation is testable without a device.
pub fn normalize_output(raw: &str, command: &str, prompt: &str) -> String {
    let cleaned = sanitize::sanitize_text(raw.as_bytes());
    let mut lines: Vec<&str> = cleaned.lines().collect();

    // Drop the command echo at the head.
    if let Some(first) = lines.first() {
        let first = first.trim();
        if !command.is_empty() && (first == command || first.ends_with(command)) {
            lines.remove(0);
        }
    }

    // Drop the prompt line at the tail.
    while let Some(last) = lines.last() {
        let last_trimmed = last.trim();
        if last_trimmed.is_empty() {
            lines.pop();
            continue;
        }
        if !prompt.is_empty() && (last_trimmed == prompt || last_trimmed.starts_with(prompt)) {
            lines.pop();
        }
        break;
    }

    let mut out = lines.join("\n");
    while out.ends_with(['\n', ' ', '\t']) {
        out.pop();
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_echo_and_prompt() {
        let raw = "show version\nCisco IOS Software\nUptime is 1 week\nsw1# ";
        let out = normalize_output(raw, "show version", "sw1#");
        assert_eq!(out, "Cisco IOS Software\nUptime is 1 week\n");
    }

    #[test]
    fn test_normalize_prompt_echo_prefix() {
        // Some devices echo "<prompt> <command>" on one line.
        let raw = "sw1# show clock\n12:00:00 UTC\nsw1#";
        let out = normalize_output(raw, "show clock", "sw1#");
        assert_eq!(out, "12:00:00 UTC\n");
    }

    #[test]
    fn test_normalize_empty_output() {
        let out = normalize_output("terminal length 0\nsw1#", "terminal length 0", "sw1#");
        assert_eq!(out, "");
    }

    #[test]
    fn test_normalize_keeps_body_prompt_lookalikes() {
        let raw = "show run\nbanner motd # welcome #\nend\nsw1#";
        let out = normalize_output(raw, "show run", "sw1#");
        assert!(out.contains("banner motd # welcome #"));
        assert!(!out.contains("show run"));
    }

    #[test]
    fn test_normalize_final_newline() {
        let out = normalize_output("cmd\ndata", "cmd", "");
        assert_eq!(out, "data\n");
    }
}
