use std::net::Ipv4Addr;

use tracing::{info, instrument, warn};

use super::{keys::KeyError, Registry, ServiceError};
use crate::{
    netlink::wireguard::Device,
    store::InterfaceConfig,
    system::StackError,
    utils::{interface_address, valid_interface_name},
    wireguard::InterfaceSection,
};

/// Result of a successful `add_interface`.
#[derive(Debug, Clone)]
pub struct NewInterface {
    pub name: String,
    pub address: Ipv4Addr,
    pub listen_port: u16,
    pub public_key: String,
}

/// Stored configuration of an interface plus its kernel state, if it is up.
#[derive(Debug)]
pub struct InterfaceStatus {
    pub config: InterfaceConfig,
    pub public_key: String,
    pub device: Option<Device>,
}

impl Registry {
    /// Creates `<name>.conf`, registers the interface with the service
    /// manager and brings it up. The host octet of `address` is always
    /// replaced with 1.
    #[instrument(skip(self, private_key))]
    pub async fn add_interface(
        &self,
        name: &str,
        address: Ipv4Addr,
        listen_port: u16,
        private_key: Option<String>,
    ) -> Result<NewInterface, ServiceError> {
        if !valid_interface_name(name) {
            return Err(ServiceError::InvalidArgument(format!(
                "invalid interface name `{name}`"
            )));
        }
        if self.store.interface_exists(name).await {
            return Err(ServiceError::AlreadyExists(format!("interface {name}")));
        }

        let private_key = match private_key {
            Some(key) => key.trim().to_owned(),
            None => self.keys.generate_private_key().await?,
        };
        let public_key = match self.keys.derive_public_key(&private_key).await {
            Err(KeyError::InvalidKey) => {
                return Err(ServiceError::InvalidArgument("invalid private key".to_owned()))
            }
            res => res?,
        };

        let address = interface_address(address);
        let text = InterfaceSection {
            address,
            private_key: &private_key,
            listen_port,
        }
        .to_string();

        let _lock = self.store.lock(name).await?;
        self.store.create_interface(name, &text).await?;

        if let Err(e) = self.start_interface(name).await {
            if let Err(e) = self.store.delete_interface(name).await {
                warn!("failed to remove {name}.conf: {e}");
            }
            return Err(e.into());
        }

        info!("created interface {name} at {address}/24, port {listen_port}");
        Ok(NewInterface {
            name: name.to_owned(),
            address,
            listen_port,
            public_key,
        })
    }

    async fn start_interface(&self, name: &str) -> Result<(), StackError> {
        self.stack.register_persistent(name).await?;

        let path = self.store.interface_path(name);
        if let Err(e) = self.stack.bring_up(name, &path).await {
            if let Err(e) = self.stack.deregister_persistent(name).await {
                warn!("failed to deregister {name}: {e}");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stops and forgets `name`, deleting its file, its lock and every
    /// generated peer config. Failures to stop are only logged.
    #[instrument(skip(self))]
    pub async fn remove_interface(&self, name: &str) -> Result<(), ServiceError> {
        let _lock = self.lock_interface(name).await?;

        let path = self.store.interface_path(name);
        if let Err(e) = self.stack.bring_down(name, &path).await {
            warn!("failed to bring {name} down: {e}");
        }
        if let Err(e) = self.stack.deregister_persistent(name).await {
            warn!("failed to deregister {name}: {e}");
        }
        self.store.delete_interface(name).await?;

        info!("removed interface {name}");
        Ok(())
    }

    /// Interfaces in the config directory. Files whose name can't be an
    /// interface name are skipped.
    pub async fn interfaces(&self) -> Result<Vec<String>, ServiceError> {
        let mut names = self.store.interfaces().await?;
        names.retain(|name| valid_interface_name(name));
        Ok(names)
    }

    #[instrument(skip(self))]
    pub async fn show_interface(&self, name: &str) -> Result<InterfaceStatus, ServiceError> {
        let config = {
            let _lock = self.lock_interface(name).await?;
            self.store.read_interface(name).await?
        };
        let public_key = self.keys.derive_public_key(&config.private_key).await?;

        let device = match self.stack.device(name).await {
            Ok(device) => Some(device),
            Err(StackError::NotRunning(_)) => {
                warn!("{name} is not running");
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(InterfaceStatus {
            config,
            public_key,
            device,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::service::testing::{registry, FakeStack, StackCall};

    const SERVER_PRIVATE: &str = "dwdtCnMYpX08FsFyUbJmRd9ML4frwJkqsXf7pR25LCo=";
    const SERVER_PUBLIC: &str = "hSDwCYkwp1R0i33ctD73Wg2/Og0mOBr066SpjqqbTmo=";

    #[tokio::test]
    async fn creates_interface_on_host_one() {
        let stack = Arc::new(FakeStack::default());
        let (dir, registry) = registry(stack.clone());

        let iface = registry
            .add_interface(
                "wg1",
                Ipv4Addr::new(192, 168, 250, 42),
                51950,
                Some(SERVER_PRIVATE.to_owned()),
            )
            .await
            .unwrap();

        assert_eq!(iface.address, Ipv4Addr::new(192, 168, 250, 1));
        assert_eq!(iface.public_key, SERVER_PUBLIC);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("wg1.conf")).unwrap(),
            format!(
                "[Interface]\nAddress = 192.168.250.1/24\nPrivateKey = {SERVER_PRIVATE}\nListenPort = 51950\n"
            )
        );
        assert_eq!(
            stack.calls(),
            [
                StackCall::Register("wg1".into()),
                StackCall::BringUp("wg1".into())
            ]
        );
        assert_eq!(registry.interfaces().await.unwrap(), ["wg1"]);
    }

    #[tokio::test]
    async fn existing_interface_is_kept() {
        let stack = Arc::new(FakeStack::default());
        let (dir, registry) = registry(stack.clone());
        registry
            .add_interface("wg0", Ipv4Addr::new(10, 0, 0, 1), 51820, None)
            .await
            .unwrap();
        let before = std::fs::read_to_string(dir.path().join("wg0.conf")).unwrap();

        let err = registry
            .add_interface("wg0", Ipv4Addr::new(10, 9, 0, 1), 1, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::AlreadyExists(_)));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("wg0.conf")).unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn rejects_bad_input() {
        let (dir, registry) = registry(Arc::new(FakeStack::default()));
        let addr = Ipv4Addr::new(10, 0, 0, 1);

        let err = registry
            .add_interface("wg0", addr, 51820, Some("bad".to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));

        let err = registry
            .add_interface("wg/0", addr, 51820, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
        assert!(!dir.path().join("wg0.conf").exists());
    }

    #[tokio::test]
    async fn failed_start_rolls_back() {
        let stack = Arc::new(FakeStack::default());
        let (dir, registry) = registry(stack.clone());
        stack.fail("bring_up");

        let err = registry
            .add_interface("wg0", Ipv4Addr::new(10, 0, 0, 1), 51820, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Stack(_)));
        assert!(!dir.path().join("wg0.conf").exists());
        assert_eq!(
            stack.calls().last(),
            Some(&StackCall::Deregister("wg0".into()))
        );
    }

    #[tokio::test]
    async fn remove_deletes_peers() {
        let stack = Arc::new(FakeStack::default());
        let (dir, registry) = registry(stack.clone());
        registry
            .add_interface("wg0", Ipv4Addr::new(10, 0, 0, 1), 51820, None)
            .await
            .unwrap();
        registry.add_peer("wg0", "alice", None).await.unwrap();
        stack.fail("bring_down");

        registry.remove_interface("wg0").await.unwrap();

        assert!(!dir.path().join("wg0.conf").exists());
        assert!(!dir.path().join("peers/wg0").exists());
        assert!(!dir.path().join(".wg0.lock").exists());
        assert!(stack.calls().ends_with(&[
            StackCall::BringDown("wg0".into()),
            StackCall::Deregister("wg0".into())
        ]));

        let err = registry.remove_interface("wg0").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn names_cannot_leave_config_dir() {
        let stack = Arc::new(FakeStack::default());
        let (dir, registry) = registry(stack.clone());
        std::fs::write(dir.path().join("x.conf"), "[Interface]\n").unwrap();

        let err = registry.remove_interface("../x").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
        let err = registry.show_interface("wg0/../x").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
        assert!(dir.path().join("x.conf").exists());
        assert!(stack.calls().is_empty());

        std::fs::write(dir.path().join("client-of-some-other-tool.conf"), "").unwrap();
        assert_eq!(registry.interfaces().await.unwrap(), ["x"]);
    }

    #[tokio::test]
    async fn show_reports_live_peers() {
        let stack = Arc::new(FakeStack::default());
        let (_dir, registry) = registry(stack.clone());
        registry
            .add_interface("wg0", Ipv4Addr::new(10, 0, 0, 1), 51820, None)
            .await
            .unwrap();
        registry.add_peer("wg0", "alice", None).await.unwrap();

        let status = registry.show_interface("wg0").await.unwrap();
        assert_eq!(status.config.file.peers().count(), 1);
        assert_eq!(status.device.unwrap().peers.len(), 1);

        stack.stop();
        let status = registry.show_interface("wg0").await.unwrap();
        assert!(status.device.is_none());
    }
}
