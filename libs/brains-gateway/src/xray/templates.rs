use uuid::Uuid;

pub struct ShareLinkParams<'a> {
    pub client_id: Uuid,
    pub host: &'a str,
    pub port: u16,
    pub public_key: &'a str,
    pub short_id: &'a str,
    pub sni: &'a str,
}

/// VLESS + REALITY share link understood by v2rayNG, Hiddify and friends.
pub fn render_share_link(p: &ShareLinkParams<'_>) -> String {
    format!(
        "vless://{id}@{host}:{port}?encryption=none&flow=xtls-rprx-vision&type=tcp&security=reality&pbk={pbk}&sid={sid}&fp=chrome&sni={sni}#REALITY_Server",
        id = p.client_id,
        host = p.host,
        port = p.port,
        pbk = p.public_key,
        sid = p.short_id,
        sni = p.sni,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_vless_link() {
        let id = Uuid::parse_str("0b9c2d3e-1f20-4a5b-8c6d-7e8f90a1b2c3").unwrap();
        let link = render_share_link(&ShareLinkParams {
            client_id: id,
            host: "203.0.113.10",
            port: 443,
            public_key: "PBK",
            short_id: "ab12",
            sni: "www.microsoft.com",
        });
        assert_eq!(
            link,
            "vless://0b9c2d3e-1f20-4a5b-8c6d-7e8f90a1b2c3@203.0.113.10:443?encryption=none&flow=xtls-rprx-vision&type=tcp&security=reality&pbk=PBK&sid=ab12&fp=chrome&sni=www.microsoft.com#REALITY_Server"
        );
    }
}
