use netlink_packet_wireguard::{constants::WG_KEY_LEN, nlas::WgDeviceAttrs, Wireguard};

use super::DevicePeer;

/// Live state of a kernel WireGuard device.
#[derive(Debug, Default)]
pub struct Device {
    pub public_key: [u8; WG_KEY_LEN],
    pub listen_port: u16,
    pub peers: Vec<DevicePeer>,
}

impl From<Wireguard> for Device {
    fn from(wg: Wireguard) -> Self {
        let mut res = Self::default();
        for nla in wg.nlas {
            match nla {
                WgDeviceAttrs::PublicKey(pk) => {
                    res.public_key = pk;
                }
                WgDeviceAttrs::ListenPort(v) => {
                    res.listen_port = v;
                }
                WgDeviceAttrs::Peers(nlas) => {
                    res.peers = nlas.into_iter().map(|n| DevicePeer::from(n.0)).collect()
                }
                _ => (),
            }
        }
        res
    }
}
