pub mod error;
pub mod wireguard;

use genetlink::{new_connection, GenetlinkHandle};

use error::NetlinkError;

/// Generic netlink connection; the driving task lives on the tokio runtime.
#[derive(Clone)]
pub struct Netlink {
    generic: GenetlinkHandle,
}

impl Netlink {
    pub fn new() -> Result<Self, NetlinkError> {
        let (conn, handle, _) = new_connection()?;
        tokio::spawn(conn);

        Ok(Self { generic: handle })
    }
}
