use std::net::Ipv4Addr;

use serde::Serialize;

use crate::service::PeerEntry;

#[derive(Debug, Serialize)]
pub struct InterfaceListing {
    pub name: String,
    pub peers: Vec<PeerListing>,
}

#[derive(Debug, Serialize)]
pub struct PeerListing {
    pub id: String,
    pub address: Option<Ipv4Addr>,
    pub public_key: Option<String>,
}

impl From<PeerEntry> for PeerListing {
    fn from(p: PeerEntry) -> Self {
        Self {
            id: p.id,
            address: p.address,
            public_key: p.public_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_listing() {
        let listing = InterfaceListing {
            name: "wg0".to_owned(),
            peers: vec![PeerEntry {
                id: "alice".to_owned(),
                address: Some(Ipv4Addr::new(10, 0, 0, 2)),
                public_key: None,
            }
            .into()],
        };

        assert_eq!(
            serde_json::to_value(&listing).unwrap(),
            json!({
                "name": "wg0",
                "peers": [{ "id": "alice", "address": "10.0.0.2", "public_key": null }]
            })
        );
    }
}
