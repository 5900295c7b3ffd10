//! Device runner: one capture job against one device, end to end.
//!
//! Credential pre-flight, session open, prompt probe, vendor prologue,
//! command execution under the per-device budget, atomic artifact commit,
//! and optional fingerprint extraction. The session is closed on every exit
//! path; the tmp→rename commit only happens when the full command sequence
//! completed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;

use crate::cancel::CancelToken;
use crate::capture::CaptureCatalog;
use crate::credentials::CredentialSource;
use crate::error::{Error, RunnerError, SessionError};
use crate::fingerprint::{FingerprintEngine, FingerprintRecord, ParseResult};
use crate::platform::VendorRegistry;
use crate::session::{DeviceSession, SessionConfig};
use crate::transport::SshConfig;

/// Ceiling on the connect phase, independent of the device budget.
const CONNECT_CAP: Duration = Duration::from_secs(20);

/// Ceiling on a single command.
const PER_COMMAND_CAP: Duration = Duration::from_secs(60);

/// One unit of work for the scheduler.
#[derive(Debug, Clone)]
pub struct DeviceJob {
    pub display_name: String,
    pub host: String,
    pub port: u16,
    pub credential_id: String,
    pub vendor_hint: Option<String>,
    pub commands: Vec<String>,
    pub capture_type: String,
    /// Final capture artifact path; `None` for fingerprint-only jobs.
    pub output_path: Option<PathBuf>,
    /// Fingerprint artifact path, when extraction is requested.
    pub fingerprint_path: Option<PathBuf>,
    pub per_device_timeout: Duration,
}

/// Job outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Failed,
    Canceled,
}

/// Per-device result surfaced in the batch aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceResult {
    pub display_name: String,
    pub host: String,
    pub status: JobStatus,
    pub elapsed_ms: u64,
    pub bytes_written: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub fingerprint: Option<FingerprintRecord>,
}

impl DeviceResult {
    fn new(job: &DeviceJob, status: JobStatus, elapsed: Duration) -> Self {
        Self {
            display_name: job.display_name.clone(),
            host: job.host.clone(),
            status,
            elapsed_ms: elapsed.as_millis() as u64,
            bytes_written: 0,
            error: None,
            fingerprint: None,
        }
    }

    fn failed(job: &DeviceJob, elapsed: Duration, error: impl ToString) -> Self {
        let mut r = Self::new(job, JobStatus::Failed, elapsed);
        r.error = Some(error.to_string());
        r
    }

    fn canceled(job: &DeviceJob, elapsed: Duration) -> Self {
        Self::new(job, JobStatus::Canceled, elapsed)
    }
}

/// Lifecycle phases, totally ordered per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressPhase {
    Scheduled,
    Started,
    Connected,
    CommandsOk,
    Written,
    Done,
    Failed,
    Canceled,
}

/// Observer event for batch progress.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub host: String,
    pub phase: ProgressPhase,
    pub elapsed_ms: u64,
}

impl ProgressEvent {
    pub fn emit(
        sink: &UnboundedSender<ProgressEvent>,
        host: &str,
        phase: ProgressPhase,
        started: Instant,
    ) {
        let _ = sink.send(ProgressEvent {
            host: host.to_string(),
            phase,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }
}

/// Shared per-process context for running jobs.
pub struct DeviceRunner {
    registry: Arc<VendorRegistry>,
    engine: Arc<FingerprintEngine>,
    credentials: Arc<CredentialSource>,
    session_config: SessionConfig,
}

impl DeviceRunner {
    pub fn new(
        registry: Arc<VendorRegistry>,
        engine: Arc<FingerprintEngine>,
        credentials: Arc<CredentialSource>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            credentials,
            session_config,
        }
    }

    /// Execute one job. Never panics across the await points; every exit
    /// path closes the session and produces a `DeviceResult`.
    pub async fn run(
        &self,
        job: &DeviceJob,
        cancel: CancelToken,
        progress: &UnboundedSender<ProgressEvent>,
    ) -> DeviceResult {
        let started = Instant::now();
        ProgressEvent::emit(progress, &job.host, ProgressPhase::Started, started);

        // Pre-flight: credential lookup.
        let Some(credential) = self.credentials.get(&job.credential_id) else {
            let err = RunnerError::CredentialMissing {
                host: job.host.clone(),
                credential_id: job.credential_id.clone(),
            };
            ProgressEvent::emit(progress, &job.host, ProgressPhase::Failed, started);
            return DeviceResult::failed(job, started.elapsed(), err);
        };

        let connect_timeout = CONNECT_CAP.min(job.per_device_timeout / 4);
        let mut ssh = SshConfig::new(
            job.host.clone(),
            job.port,
            credential.username.clone(),
            credential.auth_method(),
        );
        ssh.connect_timeout = connect_timeout;
        let enable_password = credential.enable_password.clone();

        if cancel.is_cancelled() {
            ProgressEvent::emit(progress, &job.host, ProgressPhase::Canceled, started);
            return DeviceResult::canceled(job, started.elapsed());
        }

        let mut session = match DeviceSession::open(ssh, self.session_config.clone()).await {
            Ok(s) => s,
            Err(e) => {
                ProgressEvent::emit(progress, &job.host, ProgressPhase::Failed, started);
                return DeviceResult::failed(job, started.elapsed(), Error::Transport(e));
            }
        };
        ProgressEvent::emit(progress, &job.host, ProgressPhase::Connected, started);

        let outcome = self
            .drive(
                &mut session,
                job,
                enable_password.as_deref(),
                &cancel,
                progress,
                started,
            )
            .await;

        // Close on every exit path.
        let prompt = session.observed_prompt().to_string();
        session.close().await;

        let executed = match outcome {
            Ok(executed) => executed,
            Err(e) => {
                let (phase, mut result) = match &e {
                    Error::Session(SessionError::Cancelled { .. }) => (
                        ProgressPhase::Canceled,
                        DeviceResult::canceled(job, started.elapsed()),
                    ),
                    _ => (
                        ProgressPhase::Failed,
                        DeviceResult::failed(job, started.elapsed(), &e),
                    ),
                };
                if result.status == JobStatus::Canceled {
                    result.error = None;
                }
                ProgressEvent::emit(progress, &job.host, phase, started);
                return result;
            }
        };
        ProgressEvent::emit(progress, &job.host, ProgressPhase::CommandsOk, started);

        // Cancellation before commit leaves no artifact behind.
        if cancel.is_cancelled() {
            ProgressEvent::emit(progress, &job.host, ProgressPhase::Canceled, started);
            return DeviceResult::canceled(job, started.elapsed());
        }

        let mut result = DeviceResult::new(job, JobStatus::Ok, started.elapsed());

        if let Some(output_path) = &job.output_path {
            let combined: String = executed.iter().map(|(_, out)| out.as_str()).collect();
            match write_atomic(output_path, combined.as_bytes()).await {
                Ok(bytes) => {
                    result.bytes_written = bytes;
                    ProgressEvent::emit(progress, &job.host, ProgressPhase::Written, started);
                }
                Err(source) => {
                    let err = RunnerError::WriteFailed {
                        path: output_path.display().to_string(),
                        source,
                    };
                    ProgressEvent::emit(progress, &job.host, ProgressPhase::Failed, started);
                    return DeviceResult::failed(job, started.elapsed(), err);
                }
            }
        }

        if CaptureCatalog::is_fingerprint_source(&job.capture_type) {
            match self.extract_fingerprint(job, &prompt, &executed).await {
                Ok(record) => result.fingerprint = Some(record),
                Err(e) => {
                    // NoMatch is a warning, never a job failure: the raw
                    // capture stays authoritative.
                    warn!("{}: fingerprint extraction incomplete: {}", job.host, e);
                }
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        ProgressEvent::emit(progress, &job.host, ProgressPhase::Done, started);
        info!(
            "{}: {} in {}ms ({} bytes)",
            job.host,
            job.capture_type,
            result.elapsed_ms,
            result.bytes_written
        );
        result
    }

    /// Probe, elevation, prologue, and command loop under the device budget.
    async fn drive(
        &self,
        session: &mut DeviceSession,
        job: &DeviceJob,
        enable_password: Option<&str>,
        cancel: &CancelToken,
        _progress: &UnboundedSender<ProgressEvent>,
        started: Instant,
    ) -> Result<Vec<(String, String)>, Error> {
        session.probe_prompt(cancel).await.map_err(Error::Session)?;

        let remaining = |started: Instant| -> Result<Duration, Error> {
            let used = started.elapsed();
            if used >= job.per_device_timeout {
                return Err(Error::Runner(RunnerError::DeviceTimeout {
                    host: job.host.clone(),
                    elapsed: used,
                }));
            }
            Ok(job.per_device_timeout - used)
        };

        // Vendor-appropriate prologue, or the generic union when the vendor
        // is unknown (rejections expected there, so no failure markers).
        let profile = job
            .vendor_hint
            .as_deref()
            .and_then(|hint| self.registry.resolve(hint));
        let (prologue, markers): (Vec<String>, Vec<String>) = match profile {
            Some(p) => (p.prologue.clone(), p.failure_markers.clone()),
            None => (self.registry.generic_prologue(), Vec::new()),
        };

        // Privilege elevation precedes paging disable: only when the vendor
        // defines an elevation command, the credential carries an enable
        // secret, and the probed prompt is still unprivileged.
        if let Some(p) = profile {
            if let (Some(command), Some(marker), Some(password)) =
                (&p.elevate_command, &p.elevate_prompt, enable_password)
            {
                if !session.observed_prompt().trim_end().ends_with('#') {
                    let per_cmd = PER_COMMAND_CAP.min(remaining(started)?);
                    let prompt = session
                        .elevate(command, marker, password, per_cmd, cancel)
                        .await
                        .map_err(Error::Session)?;
                    if !prompt.trim_end().ends_with('#') {
                        warn!(
                            "{}: elevation did not raise the prompt ({:?})",
                            job.host, prompt
                        );
                    }
                }
            }
        }

        let per_cmd = PER_COMMAND_CAP.min(remaining(started)?);
        session
            .run_prologue(&prologue, &markers, per_cmd, cancel)
            .await
            .map_err(Error::Session)?;

        let mut executed = Vec::with_capacity(job.commands.len());
        for command in &job.commands {
            let per_cmd = PER_COMMAND_CAP.min(remaining(started)?);
            let output = session
                .execute(command, per_cmd, cancel)
                .await
                .map_err(Error::Session)?;
            debug!("{}: '{}' -> {} bytes", job.host, command, output.len());
            executed.push((command.clone(), output));
        }
        Ok(executed)
    }

    /// Run the engine over fingerprint-source outputs and commit the record.
    async fn extract_fingerprint(
        &self,
        job: &DeviceJob,
        prompt: &str,
        executed: &[(String, String)],
    ) -> Result<FingerprintRecord, Error> {
        let mut parses: Vec<(String, String, Option<ParseResult>)> = Vec::new();
        for (command, output) in executed {
            let parse = self
                .engine
                .parse(command, output, job.vendor_hint.as_deref())
                .ok();
            parses.push((command.clone(), output.clone(), parse));
        }

        let record = self.engine.build_record(
            &job.host,
            job.port,
            prompt,
            job.vendor_hint.as_deref(),
            &parses,
            &Utc::now().to_rfc3339(),
        );

        if let Some(path) = &job.fingerprint_path {
            let json = serde_json::to_vec_pretty(&record).unwrap_or_default();
            write_atomic(path, &json)
                .await
                .map_err(|source| RunnerError::WriteFailed {
                    path: path.display().to_string(),
                    source,
                })?;
        }
        Ok(record)
    }
}

/// Atomic artifact commit: write `<path>.tmp`, fsync, rename.
///
/// The rename is the commit point; a crash before it leaves nothing visible
/// under the final path.
pub async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(data.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_commits_and_cleans_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version").join("abc-sw-01.txt");

        let bytes = write_atomic(&path, b"capture body\n").await.unwrap();
        assert_eq!(bytes, 13);
        assert_eq!(std::fs::read(&path).unwrap(), b"capture body\n");

        // No tmp file remains after the rename.
        let tmp = PathBuf::from(format!("{}.tmp", path.display()));
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn test_write_atomic_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }
}
