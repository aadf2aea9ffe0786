use std::net::Ipv4Addr;

use thiserror::Error;

use crate::store::InterfaceConfig;

/// Host octet of the interface itself; peers start right after it.
pub const INTERFACE_HOST: u8 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no free address left in {}.{}.{}.0/24", .0[0], .0[1], .0[2])]
pub struct AddressSpaceExhausted(pub [u8; 3]);

/// Monotonic allocator over an interface's /24.
///
/// The counter is the highest host octet seen in the peer blocks or the
/// allocation mark, so addresses of removed peers are never handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressAllocator {
    prefix: [u8; 3],
    last: u8,
}

impl AddressAllocator {
    pub fn for_interface(config: &InterfaceConfig) -> Self {
        let last = config
            .file
            .peers()
            .filter_map(|p| p.address)
            .chain(config.file.high_water())
            .filter(|a| config.in_subnet(*a))
            .map(|a| a.octets()[3])
            .fold(INTERFACE_HOST, u8::max);

        Self {
            prefix: config.prefix(),
            last,
        }
    }

    /// Highest address handed out so far, if any.
    pub fn last_address(&self) -> Option<Ipv4Addr> {
        let [a, b, c] = self.prefix;
        Some(Ipv4Addr::new(a, b, c, self.last)).filter(|_| self.last > INTERFACE_HOST)
    }

    pub fn next_address(&self) -> Result<Ipv4Addr, AddressSpaceExhausted> {
        let host = self
            .last
            .checked_add(1)
            .ok_or(AddressSpaceExhausted(self.prefix))?;
        let [a, b, c] = self.prefix;

        Ok(Ipv4Addr::new(a, b, c, host))
    }
}
