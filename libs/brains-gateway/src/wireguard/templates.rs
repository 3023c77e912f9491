/// Everything needed to render an AmneziaWG client config.
pub struct ClientConfigParams<'a> {
    pub address: &'a str,
    pub private_key: &'a str,
    pub server_public_key: &'a str,
    pub preshared_key: &'a str,
    pub endpoint: &'a str,
}

/// Client config importable by AmneziaVPN. The obfuscation values must match
/// the gateway's `[Interface]`.
pub fn render_client_config(p: &ClientConfigParams<'_>) -> String {
    format!(
        "[Interface]
Address = {address}
DNS = 1.1.1.1, 1.1.0.1
PrivateKey = {private_key}
Jc = 4
Jmin = 10
Jmax = 50
S1 = 138
S2 = 123
H1 = 2109784424
H2 = 457947774
H3 = 1374400826
H4 = 1191593502

[Peer]
PublicKey = {server_public_key}
PresharedKey = {preshared_key}
AllowedIPs = 0.0.0.0/0, ::/0
Endpoint = {endpoint}
PersistentKeepalive = 25",
        address = p.address,
        private_key = p.private_key,
        server_public_key = p.server_public_key,
        preshared_key = p.preshared_key,
        endpoint = p.endpoint,
    )
}
