use std::net::IpAddr;

use cidr::IpCidr;
use netlink_packet_wireguard::{
    constants::{AF_INET, AF_INET6, WGPEER_F_REMOVE_ME, WGPEER_F_REPLACE_ALLOWEDIPS, WG_KEY_LEN},
    nlas::{WgAllowedIp, WgAllowedIpAttrs, WgPeerAttrs},
};

#[derive(Debug)]
pub struct PeerUpdate {
    pub public_key: [u8; WG_KEY_LEN],
    pub allowed_ips: Option<Vec<IpCidr>>,
    pub remove: bool,
}

impl PeerUpdate {
    /// Adds the peer, or replaces the allowed IPs of an existing one.
    pub fn set(public_key: [u8; WG_KEY_LEN], allowed_ips: Vec<IpCidr>) -> Self {
        Self {
            public_key,
            allowed_ips: Some(allowed_ips),
            remove: false,
        }
    }

    pub fn remove(public_key: [u8; WG_KEY_LEN]) -> Self {
        Self {
            public_key,
            allowed_ips: None,
            remove: true,
        }
    }
}

impl From<PeerUpdate> for Vec<WgPeerAttrs> {
    fn from(p: PeerUpdate) -> Self {
        let mut res = vec![WgPeerAttrs::PublicKey(p.public_key)];
        let mut flags = 0;

        if let Some(ips) = p.allowed_ips {
            let allowed_ips = ips
                .into_iter()
                .map(|i| {
                    let family = match i.first_address() {
                        IpAddr::V4(_) => AF_INET,
                        IpAddr::V6(_) => AF_INET6,
                    };
                    WgAllowedIp(vec![
                        WgAllowedIpAttrs::Family(family),
                        WgAllowedIpAttrs::IpAddr(i.first_address()),
                        WgAllowedIpAttrs::Cidr(i.network_length()),
                    ])
                })
                .collect();
            res.push(WgPeerAttrs::AllowedIps(allowed_ips));
            flags |= WGPEER_F_REPLACE_ALLOWEDIPS;
        }
        if p.remove {
            flags |= WGPEER_F_REMOVE_ME;
        }
        if flags != 0 {
            res.push(WgPeerAttrs::Flags(flags));
        }

        res
    }
}
