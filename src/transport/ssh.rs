//! SSH transport implementation using russh.

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle, Msg};
use russh::keys::{load_secret_key, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg};

use super::config::{AuthMethod, SshConfig};
use crate::error::TransportError;

/// SSH transport wrapping a russh client and its interactive shell channel.
pub struct SshTransport {
    session: Handle<SshHandler>,
    channel: Channel<Msg>,
    config: SshConfig,
}

impl SshTransport {
    /// Connect, authenticate, and open a PTY shell channel.
    pub async fn connect(config: SshConfig) -> Result<Self, TransportError> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        let handler = SshHandler;

        let mut session = tokio::time::timeout(
            config.connect_timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            host: config.host.clone(),
            elapsed: config.connect_timeout,
        })?
        .map_err(TransportError::Ssh)?;

        Self::authenticate(&mut session, &config).await?;

        let channel = Self::open_shell(&session, &config).await?;

        Ok(Self {
            session,
            channel,
            config,
        })
    }

    /// Open a PTY channel and request an interactive shell on it.
    async fn open_shell(
        session: &Handle<SshHandler>,
        config: &SshConfig,
    ) -> Result<Channel<Msg>, TransportError> {
        let channel = session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_pty(
                true,
                "xterm",
                config.terminal_width,
                config.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        Ok(channel)
    }

    /// Authenticate with the server.
    async fn authenticate(
        session: &mut Handle<SshHandler>,
        config: &SshConfig,
    ) -> Result<(), TransportError> {
        let success = match &config.auth {
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password)
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_deref())
                    .map_err(|e| TransportError::Key(e.to_string()))?;

                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(
                        &config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                host: config.host.clone(),
                user: config.username.clone(),
            });
        }

        Ok(())
    }

    /// Write a line to the shell. A newline is appended for the device.
    pub async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');
        self.channel
            .data(&payload[..])
            .await
            .map_err(TransportError::Ssh)
    }

    /// Wait up to `wait` for the next data frame from the shell.
    ///
    /// `Ok(Some(bytes))` on data, `Ok(None)` when the interval elapsed with
    /// nothing to read (the drain tick), `Err(Disconnected)` on EOF/close.
    pub async fn read_step(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let msg = match tokio::time::timeout(wait, self.channel.wait()).await {
                Err(_) => return Ok(None),
                Ok(None) => {
                    return Err(TransportError::Disconnected {
                        host: self.config.host.clone(),
                    })
                }
                Ok(Some(msg)) => msg,
            };

            match msg {
                ChannelMsg::Data { data } => return Ok(Some(data.to_vec())),
                ChannelMsg::ExtendedData { data, .. } => return Ok(Some(data.to_vec())),
                ChannelMsg::Eof | ChannelMsg::Close => {
                    return Err(TransportError::Disconnected {
                        host: self.config.host.clone(),
                    })
                }
                // Window adjusts, exit status, and the like: keep waiting
                // within the same drain interval.
                _ => continue,
            }
        }
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Close the channel and disconnect. Idempotent at the protocol level:
    /// errors on an already-dead connection are swallowed.
    pub async fn close(self) {
        let _ = self.channel.eof().await;
        let _ = self
            .session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
    }
}

/// SSH client handler for russh.
///
/// Host keys are accepted unconditionally: capture fleets are full of
/// devices that regenerate keys on RMA or firmware upgrade, and the
/// inventory document is the trust anchor for what we connect to.
struct SshHandler;

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}
