//! Error types for netscribe.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for netscribe operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Interactive session errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Per-device capture job errors
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    /// Template selection / parsing errors
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    /// Relational store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Ingest-side errors
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}' on {host}")]
    AuthenticationFailed { host: String, user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Connection was closed unexpectedly
    #[error("Connection to {host} disconnected")]
    Disconnected { host: String },

    /// Operation timed out
    #[error("Operation on {host} timed out after {elapsed:?}")]
    Timeout { host: String, elapsed: Duration },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Interactive session errors (prompt detection, command execution).
#[derive(Error, Debug)]
pub enum SessionError {
    /// Prompt was not observed within the probe or tracking deadline
    #[error("Prompt not detected on {host} after {elapsed:?}; last output: {tail:?}")]
    PromptTimeout {
        host: String,
        elapsed: Duration,
        /// Truncated tail of the buffer, for diagnostics.
        tail: String,
    },

    /// A prologue command failed
    #[error("Prologue command '{command}' failed on {host}: {message}")]
    Prologue {
        host: String,
        command: String,
        message: String,
    },

    /// Command output exceeded the configured ceiling
    #[error("Output on {host} exceeded {limit} bytes")]
    OutputTooLarge { host: String, limit: usize },

    /// Read side of the channel failed
    #[error("Read failed on {host}: {message}")]
    Read { host: String, message: String },

    /// Write side of the channel failed
    #[error("Write failed on {host}: {message}")]
    Write { host: String, message: String },

    /// The session was cancelled cooperatively
    #[error("Session on {host} cancelled")]
    Cancelled { host: String },
}

/// Device runner errors (job pre-flight and commit).
#[derive(Error, Debug)]
pub enum RunnerError {
    /// No credential pair found for the job's credential id
    #[error("No credentials for id '{credential_id}' (host {host})")]
    CredentialMissing { host: String, credential_id: String },

    /// The per-device budget expired
    #[error("Device {host} timed out after {elapsed:?}")]
    DeviceTimeout { host: String, elapsed: Duration },

    /// Capture artifact could not be committed
    #[error("Write failed for {path}: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The job was cancelled before commit
    #[error("Job for {host} cancelled")]
    Cancelled { host: String },
}

/// Fingerprint engine errors.
#[derive(Error, Debug)]
pub enum FingerprintError {
    /// No candidate template scored at or above the minimum
    #[error("No template matched output of '{command}'")]
    NoMatch { command: String },

    /// A template body failed to compile
    #[error("Template '{id}' is invalid: {message}")]
    InvalidTemplate { id: String, message: String },

    /// The fingerprint record on disk could not be decoded
    #[error("Malformed fingerprint record {path}: {message}")]
    MalformedRecord { path: String, message: String },
}

/// Store adapter errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Transient lock contention; retried with backoff by callers
    #[error("Store busy after {attempts} attempts")]
    Busy { attempts: u32 },

    /// Unrecoverable store condition; aborts the load process
    #[error("Fatal store error: {message}")]
    Fatal { message: String },

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(String),

    /// Row lookup found nothing
    #[error("Not found")]
    NotFound,
}

/// Loader (ingest) errors.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Capture type not in the configured enumeration
    #[error("Unknown capture type '{capture_type}' for {path}")]
    UnknownCaptureType { capture_type: String, path: String },

    /// The capture artifact named by a store row is gone from disk
    #[error("Capture artifact missing: {path}")]
    CaptureMissing { path: String },

    /// Artifact read failure
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias using netscribe's Error.
pub type Result<T> = std::result::Result<T, Error>;
