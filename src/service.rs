pub mod interfaces;
pub mod keys;
pub mod peers;
#[cfg(test)]
pub(crate) mod testing;
pub mod wgcfg;

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
pub use interfaces::*;
pub use keys::Keygen;
pub use peers::*;
pub use wgcfg::*;

use crate::{
    store::{InterfaceLock, Store},
    traits::{KeyProvider, NetworkStack},
    utils::valid_interface_name,
};

#[derive(Debug, Parser)]
pub struct Config {
    /// Directory holding `<interface>.conf` files.
    #[clap(
        long,
        env = "WG_CONFIG_DIR",
        default_value = "/etc/wireguard",
        value_parser
    )]
    config_dir: PathBuf,
    /// Directory for generated client configs [default: <config-dir>/peers].
    #[clap(long, env = "WG_PEER_DIR", value_parser)]
    peer_dir: Option<PathBuf>,
    /// Public host name or address peers connect to.
    #[clap(long, env = "WG_ENDPOINT", value_parser)]
    endpoint: Option<String>,
    #[clap(long, env = "WG_KEYGEN", value_enum, default_value = "builtin")]
    keygen: Keygen,
}

/// Peer and interface registry over the flat-file store.
#[derive(Clone)]
pub struct Registry {
    store: Store,
    keys: Arc<dyn KeyProvider>,
    stack: Arc<dyn NetworkStack>,
    endpoint: Option<String>,
}

impl Registry {
    pub fn new(config: Config, stack: Arc<dyn NetworkStack>) -> Self {
        let peer_dir = config
            .peer_dir
            .unwrap_or_else(|| config.config_dir.join("peers"));

        Self::from_parts(
            Store::new(config.config_dir, peer_dir),
            Arc::from(config.keygen.provider()),
            stack,
            config.endpoint,
        )
    }

    pub fn from_parts(
        store: Store,
        keys: Arc<dyn KeyProvider>,
        stack: Arc<dyn NetworkStack>,
        endpoint: Option<String>,
    ) -> Self {
        Self {
            store,
            keys,
            stack,
            endpoint,
        }
    }

    /// Locks an existing interface.
    async fn lock_interface(&self, name: &str) -> Result<InterfaceLock, ServiceError> {
        if !valid_interface_name(name) {
            return Err(ServiceError::InvalidArgument(format!(
                "invalid interface name `{name}`"
            )));
        }
        if !self.store.interface_exists(name).await {
            return Err(ServiceError::NotFound(format!("interface {name}")));
        }
        Ok(self.store.lock(name).await?)
    }
}
