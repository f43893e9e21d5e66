use std::collections::HashSet;
use std::net::IpAddr;

use async_trait::async_trait;

use crate::config::IpSecurityConfig;
use crate::core::context::GatewayContext;
use crate::error::GatewayError;
use crate::filter::{Filter, IP_SECURITY_FILTER_ID, IP_SECURITY_FILTER_ORDER};

/// A CIDR range matched by network-prefix bit comparison
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    pub fn parse(raw: &str) -> Option<Self> {
        let (addr, prefix) = raw.split_once('/')?;
        let network: IpAddr = addr.trim().parse().ok()?;
        let prefix_len: u8 = prefix.trim().parse().ok()?;

        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return None;
        }
        Some(Self {
            network,
            prefix_len,
        })
    }

    /// True iff the first `prefix_len` bits of `ip` equal the network's
    pub fn contains(&self, ip: &IpAddr) -> bool {
        let (network_bytes, ip_bytes): (Vec<u8>, Vec<u8>) = match (&self.network, ip) {
            (IpAddr::V4(n), IpAddr::V4(i)) => (n.octets().to_vec(), i.octets().to_vec()),
            (IpAddr::V6(n), IpAddr::V6(i)) => (n.octets().to_vec(), i.octets().to_vec()),
            _ => return false,
        };

        let full_bytes = (self.prefix_len / 8) as usize;
        let remaining_bits = self.prefix_len % 8;

        if network_bytes[..full_bytes] != ip_bytes[..full_bytes] {
            return false;
        }

        if remaining_bits > 0 {
            let mask = 0xffu8 << (8 - remaining_bits);
            return (network_bytes[full_bytes] & mask) == (ip_bytes[full_bytes] & mask);
        }

        true
    }
}

/// Parsed whitelist/blacklist of literal IPs and CIDR ranges
struct IpList {
    literals: HashSet<IpAddr>,
    ranges: Vec<CidrRange>,
}

impl IpList {
    fn parse(entries: &[String]) -> Self {
        let mut literals = HashSet::new();
        let mut ranges = Vec::new();

        for entry in entries {
            if entry.contains('/') {
                match CidrRange::parse(entry) {
                    Some(range) => ranges.push(range),
                    None => tracing::warn!("Ignoring invalid CIDR entry: {}", entry),
                }
            } else {
                match entry.parse::<IpAddr>() {
                    Ok(ip) => {
                        literals.insert(ip);
                    }
                    Err(_) => tracing::warn!("Ignoring invalid IP entry: {}", entry),
                }
            }
        }

        Self { literals, ranges }
    }

    fn contains(&self, ip: &IpAddr) -> bool {
        self.literals.contains(ip) || self.ranges.iter().any(|r| r.contains(ip))
    }
}

/// Rejects blacklisted clients and, when the whitelist is enabled, anyone
/// not on it. The blacklist check always precedes the whitelist.
pub struct IpSecurityFilter {
    whitelist_enabled: bool,
    whitelist: IpList,
    blacklist: IpList,
}

impl IpSecurityFilter {
    pub fn new(config: &IpSecurityConfig) -> Self {
        Self {
            whitelist_enabled: config.whitelist_enabled,
            whitelist: IpList::parse(&config.whitelist),
            blacklist: IpList::parse(&config.blacklist),
        }
    }
}

#[async_trait]
impl Filter for IpSecurityFilter {
    fn id(&self) -> &'static str {
        IP_SECURITY_FILTER_ID
    }

    fn name(&self) -> &'static str {
        "IP security filter"
    }

    fn order(&self) -> i32 {
        IP_SECURITY_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &mut GatewayContext) -> Result<(), GatewayError> {
        let client_ip = ctx.request().client_ip;

        if self.blacklist.contains(&client_ip) {
            tracing::warn!("Request blocked - IP in blacklist: {}", client_ip);
            return Err(GatewayError::Blacklist(client_ip.to_string()));
        }

        if self.whitelist_enabled && !self.whitelist.contains(&client_ip) {
            tracing::warn!("Request blocked - IP not in whitelist: {}", client_ip);
            return Err(GatewayError::Whitelist(client_ip.to_string()));
        }

        tracing::debug!("IP security check passed for: {}", client_ip);
        Ok(())
    }
}
