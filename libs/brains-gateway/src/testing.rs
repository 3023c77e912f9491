//! An in-memory gateway that understands the handful of shell commands the
//! managers send, for tests here and in dependent crates.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use brains_db::models::Server;
use brains_db::sqlx::types::Json;

use crate::error::{GatewayError, Result};
use crate::executor::{Connector, RemoteExecutor, SshTarget};

pub const WG_CONFIG: &str = "/opt/amnezia/awg/wg0.conf";
pub const WG_TABLE: &str = "/opt/amnezia/awg/clientsTable";
pub const XRAY_CONFIG: &str = "/opt/amnezia/xray/server.json";
pub const XRAY_TABLE: &str = "/opt/amnezia/xray/clientsTable";

const WG_INTERFACE: &str = "\
[Interface]
PrivateKey = c2VydmVyLXByaXZhdGUta2V5
Address = 10.8.1.1/24
ListenPort = 37642
Jc = 4
Jmin = 10
Jmax = 50
S1 = 138
S2 = 123
H1 = 2109784424
H2 = 457947774
H3 = 1374400826
H4 = 1191593502
";

const XRAY_SERVER: &str = r#"{
    "log": {
        "loglevel": "error"
    },
    "inbounds": [
        {
            "port": 443,
            "protocol": "vless",
            "settings": {
                "clients": [],
                "decryption": "none"
            },
            "streamSettings": {
                "network": "tcp",
                "security": "reality"
            }
        }
    ],
    "outbounds": [
        {
            "protocol": "freedom"
        }
    ]
}
"#;

#[derive(Default)]
struct GatewayState {
    files: HashMap<(String, String), String>,
    commands: Vec<String>,
    fail_patterns: Vec<String>,
    keys_issued: u32,
    closed: bool,
}

/// A fake gateway host. Clones share state, so a test can keep one handle
/// while a manager owns another.
#[derive(Clone)]
pub struct FakeGateway {
    host: String,
    state: Arc<Mutex<GatewayState>>,
}

impl FakeGateway {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            state: Arc::default(),
        }
    }

    /// A gateway with an AmneziaWG interface and no peers.
    pub fn wireguard(host: impl Into<String>) -> Self {
        Self::new(host)
            .with_file("amnezia-awg", WG_CONFIG, WG_INTERFACE)
            .with_file("amnezia-awg", WG_TABLE, "[]\n")
    }

    /// A gateway with an Xray REALITY inbound and no clients.
    pub fn xray(host: impl Into<String>) -> Self {
        Self::new(host)
            .with_file("amnezia-xray", XRAY_CONFIG, XRAY_SERVER)
            .with_file("amnezia-xray", XRAY_TABLE, "")
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_file(self, container: &str, path: &str, content: &str) -> Self {
        self.set_file(container, path, content);
        self
    }

    pub fn set_file(&self, container: &str, path: &str, content: &str) {
        self.state()
            .files
            .insert((container.to_string(), path.to_string()), content.to_string());
    }

    pub fn file(&self, container: &str, path: &str) -> Option<String> {
        self.state()
            .files
            .get(&(container.to_string(), path.to_string()))
            .cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn count_commands(&self, needle: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    /// Makes every later command containing `needle` exit with status 1.
    pub fn fail_when(&self, needle: &str) {
        self.state().fail_patterns.push(needle.to_string());
    }

    pub fn clear_failures(&self) {
        self.state().fail_patterns.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn execute(&self, command: &str) -> std::result::Result<String, (u32, String)> {
        let mut stdin: Option<String> = None;
        let mut stdout = String::new();
        for stage in split_pipeline(&shell_words(command)) {
            stdout = self.execute_stage(&stage, stdin.take())?;
            stdin = Some(stdout.clone());
        }
        Ok(stdout)
    }

    fn execute_stage(&self, argv: &[String], stdin: Option<String>) -> std::result::Result<String, (u32, String)> {
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        let mut state = self.state();
        match args.as_slice() {
            ["printf", "%s\\n", text] => Ok(format!("{text}\n")),
            ["docker", "restart", container] => Ok(container.to_string()),
            ["docker", "exec", "-i", container, rest @ ..] => match rest {
                ["cat", path] => state
                    .files
                    .get(&(container.to_string(), path.to_string()))
                    .cloned()
                    .ok_or_else(|| (1, format!("cat: {path}: No such file or directory"))),
                ["tee", path, ">", "/dev/null"] => {
                    state
                        .files
                        .insert((container.to_string(), path.to_string()), stdin.unwrap_or_default());
                    Ok(String::new())
                }
                ["wg", "genkey"] => {
                    state.keys_issued += 1;
                    Ok(format!("private-{}=", state.keys_issued))
                }
                ["wg", "pubkey"] => match stdin.as_deref().map(str::trim) {
                    Some(private) if !private.is_empty() => Ok(format!("public-of-{private}")),
                    _ => Err((1, "wg: invalid private key".to_string())),
                },
                ["bash", "-c", script] if script.starts_with("wg syncconf ") => Ok(String::new()),
                _ => Err((127, format!("unsupported container command: {rest:?}"))),
            },
            _ => Err((127, format!("unsupported command: {args:?}"))),
        }
    }
}

#[async_trait]
impl RemoteExecutor for FakeGateway {
    async fn run(&self, command: &str) -> Result<String> {
        let failing = {
            let mut state = self.state();
            state.commands.push(command.to_string());
            state.fail_patterns.iter().any(|p| command.contains(p.as_str()))
        };
        if failing {
            return Err(GatewayError::CommandFailed {
                command: command.to_string(),
                exit_status: 1,
                stderr: "injected failure".to_string(),
            });
        }

        self.execute(command)
            .map(|out| out.trim().to_string())
            .map_err(|(exit_status, stderr)| GatewayError::CommandFailed {
                command: command.to_string(),
                exit_status,
                stderr,
            })
    }

    async fn close(&self) {
        self.state().closed = true;
    }

    fn host(&self) -> &str {
        &self.host
    }
}

/// Splits a command into words. Only covers what [`crate::shell::quote`]
/// produces: single-quoted runs and the `'\''` escape between them.
fn shell_words(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    word.push(q);
                }
            }
            '\\' => {
                in_word = true;
                word.extend(chars.next());
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            _ => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    words
}

fn split_pipeline(words: &[String]) -> Vec<Vec<String>> {
    words
        .split(|w| w == "|")
        .map(<[String]>::to_vec)
        .collect()
}

#[derive(Default)]
struct ConnectorState {
    gateways: HashMap<String, FakeGateway>,
    unreachable: HashSet<String>,
    connects: usize,
}

/// Hands out [`FakeGateway`]s by host name.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, gateway: FakeGateway) {
        self.state().gateways.insert(gateway.host.clone(), gateway);
    }

    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        let mut state = self.state();
        if unreachable {
            state.unreachable.insert(host.to_string());
        } else {
            state.unreachable.remove(host);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteExecutor>> {
        let mut state = self.state();
        if state.unreachable.contains(&target.host) {
            return Err(GatewayError::GatewayUnreachable {
                host: target.host.clone(),
                reason: "connection refused".to_string(),
            });
        }
        let gateway = state
            .gateways
            .get(&target.host)
            .cloned()
            .ok_or_else(|| GatewayError::GatewayUnreachable {
                host: target.host.clone(),
                reason: "no route to host".to_string(),
            })?;
        state.connects += 1;
        Ok(Box::new(gateway))
    }
}

/// A gateway row carrying every protocol parameter.
pub fn server(id: i64, host: &str) -> Server {
    let params: BTreeMap<String, String> = [
        ("wg_public_key", "c2VydmVyLXB1YmxpYy1rZXk="),
        ("wg_preshared_key", "cHJlc2hhcmVkLWtleQ=="),
        ("xray_public_key", "cmVhbGl0eS1wdWJsaWM"),
        ("xray_short_id", "ab12cd34"),
        ("xray_sni", "www.microsoft.com"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    Server {
        id,
        host: host.to_string(),
        port: 443,
        location: "NL".to_string(),
        admin_username: "root".to_string(),
        password: Some("secret".to_string()),
        additional_info: Json(params),
    }
}
