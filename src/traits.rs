use std::{net::Ipv4Addr, path::Path};

use async_trait::async_trait;

use crate::{netlink::wireguard::Device, service::keys::KeyError, system::StackError};

/// Source of WireGuard key material. Keys travel as base64 text.
#[async_trait]
pub trait KeyProvider: Sync + Send {
    async fn generate_private_key(&self) -> Result<String, KeyError>;
    async fn derive_public_key(&self, private_key: &str) -> Result<String, KeyError>;
}

/// Control over the running network stack and the OS service manager.
#[async_trait]
pub trait NetworkStack: Sync + Send {
    async fn set_peer(
        &self,
        interface: &str,
        public_key: &str,
        address: Ipv4Addr,
    ) -> Result<(), StackError>;
    async fn remove_peer(&self, interface: &str, public_key: &str) -> Result<(), StackError>;
    async fn device(&self, interface: &str) -> Result<Device, StackError>;
    async fn bring_up(&self, interface: &str, config: &Path) -> Result<(), StackError>;
    async fn bring_down(&self, interface: &str, config: &Path) -> Result<(), StackError>;
    async fn register_persistent(&self, interface: &str) -> Result<(), StackError>;
    async fn deregister_persistent(&self, interface: &str) -> Result<(), StackError>;
}
