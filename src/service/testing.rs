use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use cidr::IpCidr;
use tempfile::TempDir;

use super::{keys::BuiltinKeys, Registry};
use crate::{
    netlink::wireguard::{Device, DevicePeer},
    service::keys::decode_key,
    store::Store,
    system::StackError,
    traits::NetworkStack,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    SetPeer(String, String, Ipv4Addr),
    RemovePeer(String, String),
    BringUp(String),
    BringDown(String),
    Register(String),
    Deregister(String),
}

/// Records every call; individual operations can be made to fail.
#[derive(Default)]
pub struct FakeStack {
    calls: Mutex<Vec<StackCall>>,
    failing: Mutex<HashSet<&'static str>>,
    stopped: AtomicBool,
}

impl FakeStack {
    pub fn calls(&self) -> Vec<StackCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Makes `op` (a `NetworkStack` method name) fail from now on.
    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    /// Peer and device calls report the interface as not running.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn call(&self, op: &'static str, call: StackCall) -> Result<(), StackError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(op) {
            return Err(StackError::Command {
                command: op.to_owned(),
                message: "boom".to_owned(),
            });
        }
        Ok(())
    }

    fn running(&self, interface: &str) -> Result<(), StackError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(StackError::NotRunning(interface.to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkStack for FakeStack {
    async fn set_peer(
        &self,
        interface: &str,
        public_key: &str,
        address: Ipv4Addr,
    ) -> Result<(), StackError> {
        self.running(interface)?;
        self.call(
            "set_peer",
            StackCall::SetPeer(interface.to_owned(), public_key.to_owned(), address),
        )
    }

    async fn remove_peer(&self, interface: &str, public_key: &str) -> Result<(), StackError> {
        self.running(interface)?;
        self.call(
            "remove_peer",
            StackCall::RemovePeer(interface.to_owned(), public_key.to_owned()),
        )
    }

    /// Device holding every peer that was set and not removed since.
    async fn device(&self, interface: &str) -> Result<Device, StackError> {
        self.running(interface)?;

        let mut peers: Vec<(String, Ipv4Addr)> = Vec::new();
        for call in self.calls() {
            match call {
                StackCall::SetPeer(i, key, addr) if i == interface => peers.push((key, addr)),
                StackCall::RemovePeer(i, key) if i == interface => {
                    peers.retain(|(k, _)| *k != key)
                }
                _ => {}
            }
        }

        Ok(Device {
            listen_port: 51820,
            peers: peers
                .into_iter()
                .map(|(key, addr)| DevicePeer {
                    public_key: decode_key(&key).unwrap_or_default(),
                    allowed_ips: vec![IpCidr::new_host(IpAddr::V4(addr))],
                    rx: 1024,
                    tx: 2048,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
    }

    async fn bring_up(&self, interface: &str, _config: &Path) -> Result<(), StackError> {
        self.call("bring_up", StackCall::BringUp(interface.to_owned()))
    }

    async fn bring_down(&self, interface: &str, _config: &Path) -> Result<(), StackError> {
        self.call("bring_down", StackCall::BringDown(interface.to_owned()))
    }

    async fn register_persistent(&self, interface: &str) -> Result<(), StackError> {
        self.call("register_persistent", StackCall::Register(interface.to_owned()))
    }

    async fn deregister_persistent(&self, interface: &str) -> Result<(), StackError> {
        self.call(
            "deregister_persistent",
            StackCall::Deregister(interface.to_owned()),
        )
    }
}

/// Registry over a fresh temporary config directory.
pub fn registry(stack: Arc<FakeStack>) -> (TempDir, Registry) {
    let dir = TempDir::new().unwrap();
    let store = Store::new(dir.path().to_owned(), dir.path().join("peers"));
    let registry = Registry::from_parts(
        store,
        Arc::new(BuiltinKeys),
        stack,
        Some("vpn.example.com".to_owned()),
    );

    (dir, registry)
}
