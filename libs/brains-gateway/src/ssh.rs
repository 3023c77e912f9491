use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::executor::{Connector, RemoteExecutor, SshTarget};

#[derive(Debug, Clone)]
pub struct SshSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// Private key used when a gateway has no password configured.
    pub key_path: PathBuf,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(60),
            key_path: PathBuf::from("id_rsa"),
        }
    }
}

struct GatewayHandler;

// Gateways are operator-registered hosts reached by address; there is no
// known_hosts store to check against.
#[async_trait]
impl client::Handler for GatewayHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    async fn authenticate(&self, session: &mut Handle<GatewayHandler>, target: &SshTarget) -> Result<()> {
        let accepted = match &target.password {
            Some(password) => session
                .authenticate_password(target.username.as_str(), password.as_str())
                .await
                .map_err(|e| unreachable(target, e))?,
            None => {
                let key_data = tokio::fs::read_to_string(&self.settings.key_path)
                    .await
                    .map_err(|e| GatewayError::AuthenticationFailed {
                        user: target.username.clone(),
                        host: format!("{} (key {}: {e})", target.host, self.settings.key_path.display()),
                    })?;
                let key = russh_keys::decode_secret_key(&key_data, None).map_err(|e| {
                    GatewayError::AuthenticationFailed {
                        user: target.username.clone(),
                        host: format!("{} (key {}: {e})", target.host, self.settings.key_path.display()),
                    }
                })?;
                session
                    .authenticate_publickey(target.username.as_str(), Arc::new(key))
                    .await
                    .map_err(|e| unreachable(target, e))?
            }
        };

        if !accepted {
            return Err(GatewayError::AuthenticationFailed {
                user: target.username.clone(),
                host: target.host.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteExecutor>> {
        info!("Connecting to {}@{}:{}", target.username, target.host, target.port);

        let config = Arc::new(client::Config::default());
        let connecting = client::connect(
            config,
            (target.host.as_str(), target.port),
            GatewayHandler,
        );
        let mut session = match tokio::time::timeout(self.settings.connect_timeout, connecting).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(unreachable(target, e)),
            Err(_) => {
                return Err(GatewayError::GatewayUnreachable {
                    host: target.host.clone(),
                    reason: format!(
                        "no answer within {}s",
                        self.settings.connect_timeout.as_secs()
                    ),
                });
            }
        };

        self.authenticate(&mut session, target).await?;
        debug!("SSH session to {} established", target.host);

        Ok(Box::new(SshSession {
            handle: session,
            host: target.host.clone(),
            command_timeout: self.settings.command_timeout,
        }))
    }
}

fn unreachable(target: &SshTarget, e: russh::Error) -> GatewayError {
    GatewayError::GatewayUnreachable {
        host: target.host.clone(),
        reason: e.to_string(),
    }
}

/// One authenticated SSH connection. Each command gets its own channel.
pub struct SshSession {
    handle: Handle<GatewayHandler>,
    host: String,
    command_timeout: Duration,
}

impl SshSession {
    fn lost(&self, e: russh::Error) -> GatewayError {
        GatewayError::ConnectionLost {
            host: self.host.clone(),
            reason: e.to_string(),
        }
    }

    async fn exec(&self, command: &str) -> Result<String> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| self.lost(e))?;
        channel.exec(true, command).await.map_err(|e| self.lost(e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        match exit_status {
            Some(0) => Ok(command_output(&stdout)),
            Some(code) => Err(GatewayError::CommandFailed {
                command: command.to_string(),
                exit_status: code,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            }),
            None => Err(GatewayError::ConnectionLost {
                host: self.host.clone(),
                reason: "channel closed without an exit status".to_string(),
            }),
        }
    }
}

/// Remote output with surrounding whitespace removed. Key material read
/// back from a gateway is used verbatim, so a stray leading newline matters.
fn command_output(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout).trim().to_string()
}

#[async_trait]
impl RemoteExecutor for SshSession {
    async fn run(&self, command: &str) -> Result<String> {
        debug!(host = %self.host, command = crate::error::command_summary(command), "Running remote command");
        match tokio::time::timeout(self.command_timeout, self.exec(command)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::GatewayTimeout {
                host: self.host.clone(),
                operation: crate::error::command_summary(command).to_string(),
                seconds: self.command_timeout.as_secs(),
            }),
        }
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            warn!("Failed to disconnect from {}: {}", self.host, e);
        }
    }

    fn host(&self) -> &str {
        &self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_trimmed_on_both_ends() {
        assert_eq!(command_output(b"\n  c2VydmVyLXB1Yg==\r\n"), "c2VydmVyLXB1Yg==");
        assert_eq!(command_output(b"[Interface]\nAddress = 10.8.1.1/24\n"), "[Interface]\nAddress = 10.8.1.1/24");
        assert_eq!(command_output(b""), "");
    }
}
