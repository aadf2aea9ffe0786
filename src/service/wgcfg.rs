use std::{
    io,
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
};

use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, instrument};

use super::{keys::KeyError, Registry};
use crate::{
    allocator::AddressSpaceExhausted,
    store::{InterfaceConfig, StoreError},
    system::StackError,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("{} must be readable and writable", .0.display())]
    PermissionDenied(PathBuf),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(StoreError),
    #[error(transparent)]
    AddressSpaceExhausted(#[from] AddressSpaceExhausted),
    #[error("key generation failed: {0}")]
    Keys(#[from] KeyError),
    #[error("network stack: {0}")]
    Stack(#[from] StackError),
    #[error("can't resolve public endpoint: {0}")]
    Endpoint(io::Error),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(p) => Self::NotFound(p.display().to_string()),
            StoreError::PermissionDenied(p) => Self::PermissionDenied(p),
            StoreError::AlreadyExists(p) => Self::AlreadyExists(p.display().to_string()),
            e @ (StoreError::Parse { .. } | StoreError::MissingField { .. }) => {
                Self::InvalidConfig(e)
            }
            e => Self::Store(e),
        }
    }
}

impl ServiceError {
    /// Errors that make the whole request invalid, as opposed to a single
    /// interface or peer in it. A malformed interface file only fails that
    /// interface.
    pub fn aborts_batch(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::PermissionDenied(_)
        )
    }
}

/// What a peer needs to reach an interface.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub endpoint: String,
    pub pub_key: String,
}

impl Registry {
    #[instrument(skip_all, fields(interface = %config.name))]
    pub async fn server_info(&self, config: &InterfaceConfig) -> Result<ServerInfo, ServiceError> {
        let host = match &self.endpoint {
            Some(host) => host.clone(),
            None => outbound_address().await?.to_string(),
        };
        let pub_key = self.keys.derive_public_key(&config.private_key).await?;

        Ok(ServerInfo {
            endpoint: endpoint(&host, config.listen_port),
            pub_key,
        })
    }
}

/// Source address of the default route. Connecting a UDP socket sends no
/// packets.
async fn outbound_address() -> Result<IpAddr, ServiceError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(ServiceError::Endpoint)?;
    socket
        .connect((Ipv4Addr::new(1, 1, 1, 1), 53))
        .await
        .map_err(ServiceError::Endpoint)?;
    let addr = socket.local_addr().map_err(ServiceError::Endpoint)?.ip();
    debug!("resolved outbound address {addr}");

    Ok(addr)
}

fn endpoint(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{v6}]:{port}"),
        _ => format!("{host}:{port}"),
    }
}
