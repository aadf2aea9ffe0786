use std::{net::SocketAddr, time::SystemTime};

use cidr::IpCidr;
use netlink_packet_wireguard::{
    constants::WG_KEY_LEN,
    nlas::{WgAllowedIpAttrs, WgPeerAttrs},
};

#[derive(Debug)]
pub struct DevicePeer {
    pub public_key: [u8; WG_KEY_LEN],
    pub tx: u64,
    pub rx: u64,
    pub allowed_ips: Vec<IpCidr>,
    pub persistent_keepalive: u16,
    pub last_handshake: SystemTime,
    pub endpoint: Option<SocketAddr>,
}

impl DevicePeer {
    /// `None` until the first handshake completes.
    pub fn last_handshake(&self) -> Option<SystemTime> {
        Some(self.last_handshake).filter(|t| *t != SystemTime::UNIX_EPOCH)
    }
}

impl Default for DevicePeer {
    fn default() -> Self {
        Self {
            public_key: Default::default(),
            tx: Default::default(),
            rx: Default::default(),
            allowed_ips: Default::default(),
            persistent_keepalive: Default::default(),
            last_handshake: SystemTime::UNIX_EPOCH,
            endpoint: Default::default(),
        }
    }
}

impl From<Vec<WgPeerAttrs>> for DevicePeer {
    fn from(nlas: Vec<WgPeerAttrs>) -> Self {
        let mut res = Self::default();

        for nla in nlas {
            match nla {
                WgPeerAttrs::PublicKey(k) => {
                    res.public_key = k;
                }
                WgPeerAttrs::Endpoint(v) => {
                    res.endpoint = Some(v);
                }
                WgPeerAttrs::PersistentKeepalive(v) => {
                    res.persistent_keepalive = v;
                }
                WgPeerAttrs::LastHandshake(v) => {
                    res.last_handshake = v;
                }
                WgPeerAttrs::RxBytes(v) => {
                    res.rx = v;
                }
                WgPeerAttrs::TxBytes(v) => {
                    res.tx = v;
                }
                WgPeerAttrs::AllowedIps(ref nlas) => {
                    res.allowed_ips = nlas
                        .iter()
                        .filter_map(|n| {
                            let ipaddr = n.iter().find_map(|nla| match nla {
                                WgAllowedIpAttrs::IpAddr(addr) => Some(*addr),
                                _ => None,
                            })?;
                            let cidr = n.iter().find_map(|nla| match nla {
                                WgAllowedIpAttrs::Cidr(cidr) => Some(*cidr),
                                _ => None,
                            })?;

                            IpCidr::new(ipaddr, cidr).ok()
                        })
                        .collect();
                }
                _ => {}
            }
        }
        res
    }
}
