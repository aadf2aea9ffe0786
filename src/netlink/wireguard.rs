mod device;
mod peer;
mod update;

pub use device::*;
pub use peer::*;
pub use update::*;

use futures::StreamExt;
use netlink_packet_core::{NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST};
use netlink_packet_generic::GenlMessage;
use netlink_packet_wireguard::{
    nlas::{WgDeviceAttrs, WgPeer},
    Wireguard, WireguardCmd,
};
use tracing::instrument;

use super::{Netlink, NetlinkError};

impl Netlink {
    /// Current kernel state of a WireGuard device.
    ///
    /// Large peer lists come back split over several dump messages; their
    /// peers are merged into one `Device`.
    #[instrument(skip(self))]
    pub async fn wg_device(&mut self, name: &str) -> Result<Device, NetlinkError> {
        let genlmsg: GenlMessage<Wireguard> = GenlMessage::from_payload(Wireguard {
            cmd: WireguardCmd::GetDevice,
            nlas: vec![WgDeviceAttrs::IfName(name.to_owned())],
        });

        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = NLM_F_REQUEST | NLM_F_DUMP;
        let mut responses = self.generic.request(nlmsg).await?;

        let mut device: Option<Device> = None;
        while let Some(result) = responses.next().await {
            let resp = result?;
            match resp.payload {
                NetlinkPayload::InnerMessage(genlmsg) => {
                    let part = Device::from(genlmsg.payload);
                    match device.as_mut() {
                        Some(d) => d.peers.extend(part.peers),
                        None => device = Some(part),
                    }
                }
                NetlinkPayload::Error(err) if err.code != 0 => {
                    return Err(NetlinkError::from(err.code))
                }
                _ => {}
            }
        }

        device.ok_or(NetlinkError::UnexpectedResponse)
    }

    #[instrument(skip(self))]
    pub async fn wireguard_update(
        &mut self,
        name: &str,
        peers: Vec<PeerUpdate>,
    ) -> Result<(), NetlinkError> {
        let genlmsg: GenlMessage<Wireguard> = GenlMessage::from_payload(Wireguard {
            cmd: WireguardCmd::SetDevice,
            nlas: vec![
                WgDeviceAttrs::IfName(name.to_owned()),
                WgDeviceAttrs::Peers(peers.into_iter().map(|p| WgPeer(p.into())).collect()),
            ],
        });

        let mut nlmsg = NetlinkMessage::from(genlmsg);
        nlmsg.header.flags = NLM_F_REQUEST | NLM_F_ACK;

        let mut responses = self.generic.request(nlmsg).await?;

        while let Some(result) = responses.next().await {
            let resp = result?;
            match resp.payload {
                NetlinkPayload::Error(err) if err.code != 0 => {
                    return Err(NetlinkError::from(err.code))
                }
                NetlinkPayload::Ack(ack) if ack.code != 0 => {
                    return Err(NetlinkError::from(ack.code))
                }
                NetlinkPayload::Error(_) | NetlinkPayload::Ack(_) => return Ok(()),
                _ => {}
            }
        }

        Ok(())
    }
}
