use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use brains_gateway::{AddressPool, SshSettings};
use serde::{Deserialize, Serialize};

const CONFIG_PATHS: [&str; 2] = ["/etc/brains/bot.toml", "./bot.toml"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub bot_token: String,
    /// Telegram id of the operator who reviews receipts and may `/grant`.
    pub admin_id: i64,
    pub database_url: String,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub ssh_connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub ssh_command_timeout_secs: u64,
    #[serde(default = "default_key_path")]
    pub ssh_key_path: PathBuf,
    #[serde(default = "default_wg_pool")]
    pub wg_pool: String,
    #[serde(default)]
    pub payment_url: String,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

fn default_sweep_interval() -> u64 {
    86_400
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_command_timeout() -> u64 {
    60
}

fn default_key_path() -> PathBuf {
    PathBuf::from("id_rsa")
}

fn default_wg_pool() -> String {
    "10.8.1.0/24".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("bot.log")
}

impl BotConfig {
    /// Reads the first config file that exists, falling back to the
    /// environment. Returns where the values came from.
    pub fn load() -> Result<(Self, String)> {
        for path in CONFIG_PATHS {
            if let Ok(contents) = fs::read_to_string(path) {
                let config = Self::from_toml(&contents).with_context(|| format!("Failed to parse {path}"))?;
                return Ok((config, path.to_string()));
            }
        }
        Ok((Self::from_env()?, "environment".to_string()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn from_env() -> Result<Self> {
        let var = |key: &str| std::env::var(key).with_context(|| format!("{key} is not set"));
        let parsed = |key: &str, default: u64| -> Result<u64> {
            match std::env::var(key) {
                Ok(v) => v.trim().parse().with_context(|| format!("{key} must be a number")),
                Err(_) => Ok(default),
            }
        };

        let config = Self {
            bot_token: var("BOT_TOKEN")?,
            admin_id: var("ADMIN_ID")?
                .trim()
                .parse()
                .context("ADMIN_ID must be a Telegram user id")?,
            database_url: var("DATABASE_URL")?,
            sweep_interval_secs: parsed("SWEEP_INTERVAL_SECS", default_sweep_interval())?,
            ssh_connect_timeout_secs: parsed("SSH_CONNECT_TIMEOUT_SECS", default_connect_timeout())?,
            ssh_command_timeout_secs: parsed("SSH_COMMAND_TIMEOUT_SECS", default_command_timeout())?,
            ssh_key_path: std::env::var("SSH_KEY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_key_path()),
            wg_pool: std::env::var("WG_POOL").unwrap_or_else(|_| default_wg_pool()),
            payment_url: std::env::var("PAYMENT_URL").unwrap_or_default(),
            log_file: std::env::var("LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_log_file()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be positive");
        }
        self.address_pool()?;
        Ok(())
    }

    pub fn address_pool(&self) -> Result<AddressPool> {
        self.wg_pool
            .parse()
            .with_context(|| format!("Invalid wg_pool {:?}", self.wg_pool))
    }

    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            connect_timeout: Duration::from_secs(self.ssh_connect_timeout_secs),
            command_timeout: Duration::from_secs(self.ssh_command_timeout_secs),
            key_path: self.ssh_key_path.clone(),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_uses_defaults() {
        let config = BotConfig::from_toml(
            r#"
            bot_token = "123:abc"
            admin_id = 42
            database_url = "postgres://localhost/brains"
            "#,
        )
        .unwrap();

        assert_eq!(config.sweep_interval(), Duration::from_secs(86_400));
        assert_eq!(config.address_pool().unwrap().to_string(), "10.8.1.0/24");
        assert_eq!(config.ssh_settings().key_path, PathBuf::from("id_rsa"));
        assert_eq!(config.log_file, PathBuf::from("bot.log"));
    }

    #[test]
    fn rejects_bad_pool_and_zero_interval() {
        let base = r#"
            bot_token = "t"
            admin_id = 1
            database_url = "postgres://x"
        "#;
        assert!(BotConfig::from_toml(&format!("{base}\nwg_pool = \"10.8.1.0\"")).is_err());
        assert!(BotConfig::from_toml(&format!("{base}\nsweep_interval_secs = 0")).is_err());
        assert!(BotConfig::from_toml(&format!("{base}\nwg_pool = \"10.9.0.0/16\"")).is_ok());
    }
}
