use std::{fmt, net::Ipv4Addr};

use crate::store::key_value;

/// `[Interface]` stanza of a freshly created server interface.
pub struct InterfaceSection<'a> {
    pub address: Ipv4Addr,
    pub private_key: &'a str,
    pub listen_port: u16,
}

impl fmt::Display for InterfaceSection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Interface]
Address = {address}/24
PrivateKey = {private_key}
ListenPort = {listen_port}
",
            address = self.address,
            private_key = self.private_key,
            listen_port = self.listen_port,
        )
    }
}

/// Client side configuration handed to a peer.
pub struct ClientConfig<'a> {
    pub address: Ipv4Addr,
    pub private_key: &'a str,
    pub dns: &'a [String],
    pub server_public_key: &'a str,
    pub endpoint: &'a str,
    pub allowed_ips: &'a str,
}

impl fmt::Display for ClientConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Interface]
PrivateKey = {private_key}
Address = {ip}/32
",
            private_key = self.private_key,
            ip = self.address,
        )?;
        if !self.dns.is_empty() {
            writeln!(f, "DNS = {}", self.dns.join(", "))?;
        }
        write!(
            f,
            "
[Peer]
PublicKey = {pub_key}
Endpoint = {endpoint}
AllowedIPs = {allowed_ips}
",
            pub_key = self.server_public_key,
            endpoint = self.endpoint,
            allowed_ips = self.allowed_ips,
        )
    }
}

/// `PrivateKey` of the `[Interface]` section of a client config.
pub fn private_key(config: &str) -> Option<&str> {
    let mut in_interface = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_interface = line.eq_ignore_ascii_case("[Interface]");
        } else if in_interface {
            match key_value(line) {
                Some((k, v)) if k.eq_ignore_ascii_case("PrivateKey") && !v.is_empty() => {
                    return Some(v)
                }
                _ => {}
            }
        }
    }
    None
}
