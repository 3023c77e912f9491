use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;

use crate::error::{GatewayError, Result};

/// An IPv4 subnet handed out one `/32` per peer. The first host address is
/// the gateway's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPool {
    net: Ipv4Net,
}

impl Default for AddressPool {
    fn default() -> Self {
        Self {
            net: Ipv4Net::new_assert(Ipv4Addr::new(10, 8, 1, 0), 24),
        }
    }
}

impl AddressPool {
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if !(8..=30).contains(&prefix_len) {
            return Err(GatewayError::malformed(
                "address pool",
                format!("prefix /{prefix_len} is outside /8../30"),
            ));
        }
        let net = Ipv4Net::new(network, prefix_len)
            .map_err(|e| GatewayError::malformed("address pool", e.to_string()))?;
        Ok(Self { net: net.trunc() })
    }

    pub fn gateway_address(&self) -> Ipv4Addr {
        self.net.hosts().next().unwrap_or(self.net.network())
    }

    /// Whether `addr` is a host address of the pool.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.net.contains(&addr) && addr != self.net.network() && addr != self.net.broadcast()
    }

    /// Lowest free host address as `a.b.c.d/32`. `reserved` takes strings in
    /// either `a.b.c.d` or `a.b.c.d/nn` form; anything unparsable is ignored.
    pub fn allocate<S: AsRef<str>>(&self, in_use: &BTreeSet<Ipv4Addr>, reserved: &[S]) -> Result<String> {
        let reserved: BTreeSet<Ipv4Addr> = reserved.iter().filter_map(|r| parse_host(r.as_ref())).collect();

        self.net
            .hosts()
            .skip(1)
            .find(|addr| !in_use.contains(addr) && !reserved.contains(addr))
            .map(|addr| format!("{addr}/32"))
            .ok_or_else(|| GatewayError::PoolExhausted {
                pool: self.to_string(),
            })
    }
}

impl fmt::Display for AddressPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.net, f)
    }
}

impl FromStr for AddressPool {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        let net: Ipv4Net = s
            .trim()
            .parse()
            .map_err(|e| GatewayError::malformed("address pool", format!("{s:?}: {e}")))?;
        AddressPool::new(net.addr(), net.prefix_len())
    }
}

/// `10.8.1.4/32` or `10.8.1.4` to the host address.
pub fn parse_host(s: &str) -> Option<Ipv4Addr> {
    let s = s.trim();
    let host = s.split_once('/').map_or(s, |(host, _)| host);
    host.parse().ok()
}
