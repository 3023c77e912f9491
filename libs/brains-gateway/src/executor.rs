use std::fmt;

use async_trait::async_trait;
use brains_db::models::Server;

use crate::error::Result;

/// An open administrative session on one gateway.
///
/// `run` returns the command's stdout with trailing whitespace trimmed and
/// fails with [`GatewayError::CommandFailed`](crate::GatewayError) on a
/// non-zero exit. Dropping the executor releases the connection; `close`
/// additionally says goodbye to the peer.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, command: &str) -> Result<String>;

    async fn close(&self);

    fn host(&self) -> &str;
}

/// Opens executors. The SSH implementation lives in [`crate::ssh`]; tests use
/// the in-memory one from `testing`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteExecutor>>;
}

/// Where and as whom to log in.
#[derive(Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// `None` means key authentication.
    pub password: Option<String>,
}

impl SshTarget {
    pub fn from_server(server: &Server) -> Self {
        Self {
            host: server.host.clone(),
            port: server.ssh_port(),
            username: server.admin_username.clone(),
            password: server.password.clone().filter(|p| !p.is_empty()),
        }
    }
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
