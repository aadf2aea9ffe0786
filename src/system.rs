use std::{
    net::{IpAddr, Ipv4Addr},
    path::Path,
    process::Stdio,
};

use async_trait::async_trait;
use cidr::IpCidr;
use thiserror::Error;
use tokio::{
    process::Command,
    sync::{Mutex, OnceCell},
};
use tracing::{debug, instrument};

use crate::{
    netlink::{
        error::NetlinkError,
        wireguard::{Device, PeerUpdate},
        Netlink,
    },
    service::keys::{decode_key, KeyError},
    traits::NetworkStack,
};

#[derive(Debug, Error)]
pub enum StackError {
    #[error("interface {0} is not running")]
    NotRunning(String),
    #[error(transparent)]
    Netlink(#[from] NetlinkError),
    #[error("invalid public key")]
    InvalidKey(#[from] KeyError),
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },
}

impl StackError {
    fn netlink(interface: &str, e: NetlinkError) -> Self {
        match e {
            NetlinkError::NoDevice | NetlinkError::NotFound => {
                Self::NotRunning(interface.to_owned())
            }
            e => Self::Netlink(e),
        }
    }
}

/// Kernel peers over generic netlink, interface lifecycle through
/// `wg-quick` and `systemctl`.
#[derive(Default)]
pub struct System {
    netlink: OnceCell<Mutex<Netlink>>,
}

impl System {
    pub fn new() -> Self {
        Self::default()
    }

    async fn netlink(&self) -> Result<&Mutex<Netlink>, StackError> {
        Ok(self
            .netlink
            .get_or_try_init(|| async { Netlink::new().map(Mutex::new) })
            .await?)
    }
}

async fn run(program: &str, args: &[&str]) -> Result<(), StackError> {
    let command = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!("running `{command}`");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| StackError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StackError::Command {
            command,
            message: stderr.trim().to_owned(),
        });
    }

    Ok(())
}

#[async_trait]
impl NetworkStack for System {
    #[instrument(skip(self))]
    async fn set_peer(
        &self,
        interface: &str,
        public_key: &str,
        address: Ipv4Addr,
    ) -> Result<(), StackError> {
        let update = PeerUpdate::set(
            decode_key(public_key)?,
            vec![IpCidr::new_host(IpAddr::V4(address))],
        );

        self.netlink()
            .await?
            .lock()
            .await
            .wireguard_update(interface, vec![update])
            .await
            .map_err(|e| StackError::netlink(interface, e))
    }

    #[instrument(skip(self))]
    async fn remove_peer(&self, interface: &str, public_key: &str) -> Result<(), StackError> {
        let update = PeerUpdate::remove(decode_key(public_key)?);

        self.netlink()
            .await?
            .lock()
            .await
            .wireguard_update(interface, vec![update])
            .await
            .map_err(|e| StackError::netlink(interface, e))
    }

    #[instrument(skip(self))]
    async fn device(&self, interface: &str) -> Result<Device, StackError> {
        self.netlink()
            .await?
            .lock()
            .await
            .wg_device(interface)
            .await
            .map_err(|e| StackError::netlink(interface, e))
    }

    #[instrument(skip(self))]
    async fn bring_up(&self, _interface: &str, config: &Path) -> Result<(), StackError> {
        run("wg-quick", &["up", &config.to_string_lossy()]).await
    }

    #[instrument(skip(self))]
    async fn bring_down(&self, _interface: &str, config: &Path) -> Result<(), StackError> {
        run("wg-quick", &["down", &config.to_string_lossy()]).await
    }

    #[instrument(skip(self))]
    async fn register_persistent(&self, interface: &str) -> Result<(), StackError> {
        run("systemctl", &["enable", &format!("wg-quick@{interface}")]).await
    }

    #[instrument(skip(self))]
    async fn deregister_persistent(&self, interface: &str) -> Result<(), StackError> {
        run("systemctl", &["disable", &format!("wg-quick@{interface}")]).await
    }
}
