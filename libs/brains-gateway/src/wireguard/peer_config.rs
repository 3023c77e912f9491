use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use super::ip_pool::parse_host;

/// A WireGuard server config held as raw lines, grouped into `[Section]`
/// blocks. Blocks nobody edits render back byte for byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConfig {
    preamble: Vec<String>,
    sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    lines: Vec<String>,
}

impl Section {
    fn header(&self) -> &str {
        self.lines.first().map(|l| l.trim()).unwrap_or_default()
    }

    fn is_peer(&self) -> bool {
        self.header().eq_ignore_ascii_case("[Peer]")
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.lines.iter().skip(1).find_map(|line| {
            let (key, value) = line.split_once('=')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

/// What a `[Peer]` block says about one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub public_key: String,
    pub preshared_key: String,
    pub allowed_ips: String,
}

impl PeerConfig {
    pub fn parse(text: &str) -> Self {
        let mut config = PeerConfig::default();
        for line in text.lines() {
            if line.trim_start().starts_with('[') {
                config.sections.push(Section {
                    lines: vec![line.to_string()],
                });
            } else if let Some(section) = config.sections.last_mut() {
                section.lines.push(line.to_string());
            } else {
                config.preamble.push(line.to_string());
            }
        }
        config
    }

    fn peer_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_peer())
    }

    pub fn peers(&self) -> Vec<PeerEntry> {
        self.peer_sections()
            .map(|s| PeerEntry {
                public_key: s.field("PublicKey").unwrap_or_default().to_string(),
                preshared_key: s.field("PresharedKey").unwrap_or_default().to_string(),
                allowed_ips: s.field("AllowedIPs").unwrap_or_default().to_string(),
            })
            .collect()
    }

    pub fn contains_peer(&self, public_key: &str) -> bool {
        self.peer_sections()
            .any(|s| s.field("PublicKey") == Some(public_key))
    }

    /// Every IPv4 host named in a peer's `AllowedIPs`, comma lists included.
    pub fn used_addresses(&self) -> BTreeSet<Ipv4Addr> {
        self.peer_sections()
            .filter_map(|s| s.field("AllowedIPs"))
            .flat_map(|ips| ips.split(','))
            .filter_map(parse_host)
            .collect()
    }

    /// Appends a `[Peer]` block after everything else, separated by one
    /// blank line.
    pub fn append_peer(&mut self, peer: &PeerEntry) {
        let tail = match self.sections.last_mut() {
            Some(section) => &mut section.lines,
            None => &mut self.preamble,
        };
        while tail.last().is_some_and(|l| l.trim().is_empty()) {
            tail.pop();
        }
        if !tail.is_empty() {
            tail.push(String::new());
        }

        self.sections.push(Section {
            lines: vec![
                "[Peer]".to_string(),
                format!("PublicKey = {}", peer.public_key),
                format!("PresharedKey = {}", peer.preshared_key),
                format!("AllowedIPs = {}", peer.allowed_ips),
            ],
        });
    }

    /// Drops every `[Peer]` block with this public key. Returns whether
    /// anything was removed.
    pub fn remove_peer(&mut self, public_key: &str) -> bool {
        let before = self.sections.len();
        self.sections
            .retain(|s| !(s.is_peer() && s.field("PublicKey") == Some(public_key)));
        self.sections.len() != before
    }

    /// The config text without trailing blank lines or final newline.
    pub fn render(&self) -> String {
        let mut lines: Vec<&str> = self
            .preamble
            .iter()
            .chain(self.sections.iter().flat_map(|s| s.lines.iter()))
            .map(String::as_str)
            .collect();
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }
}
