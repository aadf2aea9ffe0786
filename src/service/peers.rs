use std::net::Ipv4Addr;

use tracing::{info, instrument, warn};

use super::{Registry, ServiceError};
use crate::{
    allocator::AddressAllocator,
    store::{InterfaceConfig, StoreError},
    system::StackError,
    utils::valid_peer_name,
    wireguard::{self, ClientConfig},
};

pub const DEFAULT_DNS: [&str; 2] = ["1.1.1.1", "1.0.0.1"];
pub const DEFAULT_ALLOWED_IPS: &str = "0.0.0.0/0, ::/0";

/// A peer as recorded in the interface file.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub id: String,
    pub address: Option<Ipv4Addr>,
    pub public_key: Option<String>,
}

/// Result of a successful `add_peer`.
#[derive(Debug, Clone)]
pub struct NewPeer {
    pub id: String,
    pub address: Ipv4Addr,
    pub public_key: String,
    pub config: String,
}

impl Registry {
    /// Registers `id` on `interface`: keys, address, peer block, client
    /// config, and finally the running interface.
    #[instrument(skip(self))]
    pub async fn add_peer(
        &self,
        interface: &str,
        id: &str,
        dns: Option<&[String]>,
    ) -> Result<NewPeer, ServiceError> {
        check_peer_name(id)?;
        let _lock = self.lock_interface(interface).await?;
        let mut config = self.store.read_interface(interface).await?;
        if config.file.contains_peer(id) {
            return Err(ServiceError::AlreadyExists(format!(
                "peer {id} on {interface}"
            )));
        }

        let server = self.server_info(&config).await?;
        let private_key = self.keys.generate_private_key().await?;
        let public_key = self.keys.derive_public_key(&private_key).await?;
        let address = AddressAllocator::for_interface(&config).next_address()?;

        let default_dns = DEFAULT_DNS.map(str::to_owned);
        let client = ClientConfig {
            address,
            private_key: &private_key,
            dns: dns.unwrap_or(&default_dns),
            server_public_key: &server.pub_key,
            endpoint: &server.endpoint,
            allowed_ips: DEFAULT_ALLOWED_IPS,
        }
        .to_string();

        let original = config.file.clone();
        self.store.write_peer_file(interface, id, &client).await?;

        config.file.set_high_water(address);
        config.file.append_peer(id, &public_key, address);
        if let Err(e) = self.store.write_interface(&config).await {
            self.discard_peer_file(interface, id).await;
            return Err(e.into());
        }

        match self.stack.set_peer(interface, &public_key, address).await {
            Ok(()) => {}
            Err(StackError::NotRunning(_)) => {
                warn!("{interface} is not running, {id} goes live on next start");
            }
            Err(e) => {
                if let Err(e) = self.store.write_file(interface, &original).await {
                    warn!("failed to roll back {interface}: {e}");
                }
                self.discard_peer_file(interface, id).await;
                return Err(e.into());
            }
        }

        info!("added peer {id} with address {address}");
        Ok(NewPeer {
            id: id.to_owned(),
            address,
            public_key,
            config: client,
        })
    }

    /// Unregisters `id` from `interface`.
    ///
    /// The public key is derived from the peer's own config before anything
    /// is deleted. A peer with no key anywhere is only dropped from disk.
    #[instrument(skip(self))]
    pub async fn remove_peer(&self, interface: &str, id: &str) -> Result<(), ServiceError> {
        check_peer_name(id)?;
        let _lock = self.lock_interface(interface).await?;
        let mut config = self.store.read_interface(interface).await?;
        let block = config
            .file
            .peer(id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("peer {id} on {interface}")))?;

        match self.peer_public_key(&config, &block.id).await? {
            Some(public_key) => {
                if block.public_key.as_deref() != Some(public_key.as_str()) {
                    warn!("{} key in {interface}.conf differs from its peer config", block.id);
                }
                match self.stack.remove_peer(interface, &public_key).await {
                    Ok(()) => {}
                    Err(StackError::NotRunning(_)) => warn!("{interface} is not running"),
                    Err(e) => return Err(e.into()),
                }
            }
            None => warn!(
                "no public key for {}, it stays loaded until {interface} restarts",
                block.id
            ),
        }

        if let Some(last) = AddressAllocator::for_interface(&config).last_address() {
            config.file.set_high_water(last);
        }
        config.file.remove_peer(&block.id);
        self.store.write_interface(&config).await?;
        self.store.delete_peer_file(interface, &block.id).await?;

        info!("removed peer {}", block.id);
        Ok(())
    }

    /// Peers of `interface` in file order.
    #[instrument(skip(self))]
    pub async fn list_peers(&self, interface: &str) -> Result<Vec<PeerEntry>, ServiceError> {
        let _lock = self.lock_interface(interface).await?;
        let config = self.store.read_interface(interface).await?;

        Ok(config
            .file
            .peers()
            .map(|p| PeerEntry {
                id: p.id.clone(),
                address: p.address,
                public_key: p.public_key.clone(),
            })
            .collect())
    }

    /// Generated client config of `id`.
    #[instrument(skip(self))]
    pub async fn peer_config(&self, interface: &str, id: &str) -> Result<String, ServiceError> {
        check_peer_name(id)?;
        let _lock = self.lock_interface(interface).await?;
        let config = self.store.read_interface(interface).await?;
        let block = config
            .file
            .peer(id)
            .ok_or_else(|| ServiceError::NotFound(format!("peer {id} on {interface}")))?;

        Ok(self.store.read_peer_file(interface, &block.id).await?)
    }

    /// `None` when neither the peer config nor the peer block has a key.
    async fn peer_public_key(
        &self,
        config: &InterfaceConfig,
        id: &str,
    ) -> Result<Option<String>, ServiceError> {
        let fallback = || config.file.peer(id).and_then(|b| b.public_key.clone());

        match self.store.read_peer_file(&config.name, id).await {
            Ok(text) => match wireguard::private_key(&text) {
                Some(key) => Ok(Some(self.keys.derive_public_key(key).await?)),
                None => {
                    warn!("no private key in config of {id}, using {}.conf", config.name);
                    Ok(fallback())
                }
            },
            Err(StoreError::NotFound(path)) => {
                warn!("{} is missing, using {}.conf", path.display(), config.name);
                Ok(fallback())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discard_peer_file(&self, interface: &str, id: &str) {
        if let Err(e) = self.store.delete_peer_file(interface, id).await {
            warn!("failed to remove staged config of {id}: {e}");
        }
    }
}

fn check_peer_name(id: &str) -> Result<(), ServiceError> {
    if !valid_peer_name(id) {
        return Err(ServiceError::InvalidArgument(format!(
            "invalid peer name `{id}`"
        )));
    }
    Ok(())
}
