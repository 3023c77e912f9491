use brains_db::models::Protocol;
use thiserror::Error;

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors raised while provisioning credentials on a gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The remote command ran and exited non-zero.
    #[error("remote command `{}` exited with {exit_status}: {}", command_summary(.command), .stderr.trim())]
    CommandFailed {
        command: String,
        exit_status: u32,
        stderr: String,
    },

    #[error("gateway {host} is unreachable: {reason}")]
    GatewayUnreachable { host: String, reason: String },

    #[error("connection to {host} was lost: {reason}")]
    ConnectionLost { host: String, reason: String },

    #[error("{operation} on {host} timed out after {seconds}s")]
    GatewayTimeout {
        host: String,
        operation: String,
        seconds: u64,
    },

    #[error("authentication failed for {user}@{host}")]
    AuthenticationFailed { user: String, host: String },

    #[error("address pool {pool} has no free address")]
    PoolExhausted { pool: String },

    /// Another writer claimed the address between allocation and commit.
    #[error("address {address} is already assigned to a peer")]
    AddressInUse { address: String },

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("gateway {server_id} is missing parameter `{key}`")]
    MissingParameter { server_id: i64, key: &'static str },

    #[error("malformed {what}: {reason}")]
    MalformedConfig { what: &'static str, reason: String },

    #[error("{manager} manager cannot accept a {credential} credential")]
    CredentialMismatch {
        manager: Protocol,
        credential: Protocol,
    },
}

impl GatewayError {
    pub(crate) fn malformed(what: &'static str, reason: impl ToString) -> Self {
        GatewayError::MalformedConfig {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Commands may embed file contents or private keys piped over stdin; only
/// the stage that received the input is worth showing.
pub fn command_summary(command: &str) -> &str {
    let stage = command.rsplit(" | ").next().unwrap_or(command).trim();
    match stage.char_indices().nth(120) {
        Some((idx, _)) => &stage[..idx],
        None => stage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_hides_piped_input() {
        let cmd = "printf '%s\\n' 'PRIVATE' | docker exec -i amnezia-awg wg pubkey";
        assert_eq!(command_summary(cmd), "docker exec -i amnezia-awg wg pubkey");

        let err = GatewayError::CommandFailed {
            command: cmd.to_string(),
            exit_status: 1,
            stderr: "boom\n".to_string(),
        };
        let text = err.to_string();
        assert!(!text.contains("PRIVATE"));
        assert!(text.ends_with("boom"));
    }
}
