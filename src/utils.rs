use std::net::Ipv4Addr;

use crate::allocator::INTERFACE_HOST;

/// Splits a comma-separated `-i` / `-u` value, dropping empty items.
pub fn split_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// The interface always takes host 1 of its /24.
pub fn interface_address(addr: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = addr.octets();
    Ipv4Addr::new(a, b, c, INTERFACE_HOST)
}

fn valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_=+.-".contains(c)
}

/// Same rule as `wg-quick`: 1 to 15 of `[a-zA-Z0-9_=+.-]`.
pub fn valid_interface_name(name: &str) -> bool {
    (1..=15).contains(&name.len()) && name.chars().all(valid_char) && !name.starts_with('.')
}

/// Peer names end up in file names and block markers.
pub fn valid_peer_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && name.chars().all(|c| valid_char(c) || c == '@')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lists() {
        assert_eq!(split_names("alice, bob,,carol "), ["alice", "bob", "carol"]);
        assert!(split_names(" , ").is_empty());
    }

    #[test]
    fn forces_host_one() {
        assert_eq!(
            interface_address(Ipv4Addr::new(192, 168, 250, 42)),
            Ipv4Addr::new(192, 168, 250, 1)
        );
    }

    #[test]
    fn names() {
        assert!(valid_interface_name("wg0"));
        assert!(valid_interface_name("wg-office.1"));
        assert!(!valid_interface_name("wireguard-office0"));
        assert!(!valid_interface_name("wg/0"));
        assert!(!valid_interface_name(""));

        assert!(valid_peer_name("alice@laptop"));
        assert!(!valid_peer_name("../alice"));
        assert!(!valid_peer_name("al ice"));
        assert!(!valid_peer_name(".hidden"));
    }
}
