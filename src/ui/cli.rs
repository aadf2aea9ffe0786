use std::{
    net::Ipv4Addr,
    time::{Duration, SystemTime},
};

use clap::Subcommand;

use super::{
    qr,
    response::{InterfaceListing, PeerListing},
};
use crate::{
    service::{keys::encode_key, InterfaceStatus, Registry, ServiceError},
    utils::split_names,
};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create an interface and bring it up
    Addif {
        #[clap(short, long, value_parser)]
        interface: String,
        /// Any address of the /24; the interface always takes host 1
        #[clap(short, long, value_parser)]
        address: Ipv4Addr,
        #[clap(short, long, value_parser)]
        port: u16,
        /// Generated when omitted
        #[clap(short = 'P', long, value_parser)]
        private_key: Option<String>,
    },
    /// Bring interfaces down and delete them with all their peers
    Rmif {
        #[clap(short, long, value_parser)]
        interface: String,
    },
    /// Register peers and print their client configs
    Adduser {
        #[clap(short, long, value_parser)]
        interface: String,
        #[clap(short, long, value_parser)]
        user: String,
        /// DNS servers for the client configs [default: 1.1.1.1,1.0.0.1]
        #[clap(short, long, value_parser)]
        dns: Option<String>,
    },
    /// Unregister peers
    Rmuser {
        #[clap(short, long, value_parser)]
        interface: String,
        #[clap(short, long, value_parser)]
        user: String,
    },
    /// List peers of the given interfaces, or of all of them
    List {
        #[clap(short, long, value_parser)]
        interface: Option<String>,
        #[clap(long, action)]
        json: bool,
    },
    /// Show live interface state, or a peer's client config
    Show {
        #[clap(short, long, value_parser)]
        interface: String,
        #[clap(short, long, value_parser)]
        user: Option<String>,
    },
}

/// Counts per-entity failures. Errors that invalidate the whole request are
/// handed back instead.
#[derive(Debug, Default)]
struct Batch {
    failed: usize,
}

impl Batch {
    fn record<T>(&mut self, name: &str, res: Result<T, ServiceError>) -> Result<Option<T>, ServiceError> {
        match res {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.aborts_batch() => Err(e),
            Err(e) => {
                eprintln!("{name}: {e}");
                self.failed += 1;
                Ok(None)
            }
        }
    }
}

fn single_interface(list: &str) -> Result<String, ServiceError> {
    let mut names = split_names(list);
    match names.len() {
        1 => Ok(names.remove(0)),
        0 => Err(ServiceError::InvalidArgument("no interface given".to_owned())),
        _ => Err(ServiceError::InvalidArgument(format!(
            "exactly one interface expected, got `{list}`"
        ))),
    }
}

fn names(list: &str, what: &str) -> Result<Vec<String>, ServiceError> {
    let names = split_names(list);
    if names.is_empty() {
        return Err(ServiceError::InvalidArgument(format!("no {what} given")));
    }
    Ok(names)
}

/// Runs `command` and returns the number of entities that failed.
pub async fn run(command: Command, registry: &Registry, show_qr: bool) -> Result<usize, ServiceError> {
    let mut batch = Batch::default();

    match command {
        Command::Addif {
            interface,
            address,
            port,
            private_key,
        } => {
            let name = single_interface(&interface)?;
            let res = registry.add_interface(&name, address, port, private_key).await;
            if let Some(iface) = batch.record(&name, res)? {
                println!(
                    "{}: {}/24, port {}, public key {}",
                    iface.name, iface.address, iface.listen_port, iface.public_key
                );
            }
        }
        Command::Rmif { interface } => {
            for name in names(&interface, "interface")? {
                let res = registry.remove_interface(&name).await;
                batch.record(&name, res)?;
            }
        }
        Command::Adduser {
            interface,
            user,
            dns,
        } => {
            let interface = single_interface(&interface)?;
            let dns = dns.as_deref().map(split_names);
            for id in names(&user, "user")? {
                let res = registry.add_peer(&interface, &id, dns.as_deref()).await;
                if let Some(peer) = batch.record(&id, res)? {
                    println!("# {} {}", peer.id, peer.address);
                    print!("{}", peer.config);
                    if show_qr {
                        qr::print(&peer.config).await;
                    }
                }
            }
        }
        Command::Rmuser { interface, user } => {
            let interface = single_interface(&interface)?;
            for id in names(&user, "user")? {
                let res = registry.remove_peer(&interface, &id).await;
                batch.record(&id, res)?;
            }
        }
        Command::List { interface, json } => {
            let interfaces = match interface {
                Some(list) => names(&list, "interface")?,
                None => registry.interfaces().await?,
            };

            let mut listings = Vec::with_capacity(interfaces.len());
            for name in interfaces {
                let res = registry.list_peers(&name).await;
                if let Some(peers) = batch.record(&name, res)? {
                    listings.push(InterfaceListing {
                        name,
                        peers: peers.into_iter().map(PeerListing::from).collect(),
                    });
                }
            }

            if json {
                match serde_json::to_string_pretty(&listings) {
                    Ok(text) => println!("{text}"),
                    Err(e) => {
                        eprintln!("can't serialize listing: {e}");
                        batch.failed += 1;
                    }
                }
            } else {
                print!("{}", format_listings(&listings));
            }
        }
        Command::Show { interface, user } => {
            let interface = single_interface(&interface)?;
            match user {
                Some(id) => {
                    let res = registry.peer_config(&interface, &id).await;
                    if let Some(config) = batch.record(&id, res)? {
                        print!("{config}");
                        if show_qr {
                            qr::print(&config).await;
                        }
                    }
                }
                None => {
                    let res = registry.show_interface(&interface).await;
                    if let Some(status) = batch.record(&interface, res)? {
                        print!("{}", format_status(&status, SystemTime::now()));
                    }
                }
            }
        }
    }

    Ok(batch.failed)
}

fn format_listings(listings: &[InterfaceListing]) -> String {
    let mut out = String::new();
    for listing in listings {
        out.push_str(&format!("{}\n", listing.name));
        for peer in &listing.peers {
            let address = peer
                .address
                .map_or_else(|| "-".to_owned(), |a| a.to_string());
            out.push_str(&format!(
                "  {:<24} {:<15} {}\n",
                peer.id,
                address,
                peer.public_key.as_deref().unwrap_or("-")
            ));
        }
    }
    out
}

fn format_status(status: &InterfaceStatus, now: SystemTime) -> String {
    let config = &status.config;
    let mut out = format!(
        "interface: {}\n  public key: {}\n  address: {}\n  listening port: {}\n",
        config.name, status.public_key, config.address, config.listen_port
    );

    let Some(device) = &status.device else {
        out.push_str("  state: down\n");
        for peer in config.file.peers() {
            out.push_str(&format!("\npeer: {}\n", peer.id));
        }
        return out;
    };
    if device.listen_port != config.listen_port {
        out.push_str(&format!("  live listening port: {}\n", device.listen_port));
    }
    let live_key = encode_key(&device.public_key);
    if live_key != status.public_key {
        out.push_str(&format!("  live public key: {live_key}\n"));
    }

    for block in config.file.peers() {
        out.push_str(&format!("\npeer: {}\n", block.id));
        let live = device
            .peers
            .iter()
            .find(|p| Some(encode_key(&p.public_key)) == block.public_key);
        let Some(live) = live else {
            out.push_str("  (not loaded)\n");
            continue;
        };

        if let Some(endpoint) = live.endpoint {
            out.push_str(&format!("  endpoint: {endpoint}\n"));
        }
        let allowed_ips: Vec<_> = live
            .allowed_ips
            .iter()
            .map(|c| format!("{}/{}", c.first_address(), c.network_length()))
            .collect();
        out.push_str(&format!("  allowed ips: {}\n", allowed_ips.join(", ")));
        let handshake = match live.last_handshake() {
            Some(t) => ago(now.duration_since(t).unwrap_or_default()),
            None => "never".to_owned(),
        };
        out.push_str(&format!(
            "  latest handshake: {handshake}\n  transfer: {} received, {} sent\n",
            bytes(live.rx),
            bytes(live.tx)
        ));
        if live.persistent_keepalive != 0 {
            out.push_str(&format!(
                "  persistent keepalive: every {} seconds\n",
                live.persistent_keepalive
            ));
        }
    }
    out
}

fn ago(d: Duration) -> String {
    match d.as_secs() {
        s if s < 60 => format!("{s} seconds ago"),
        s if s < 3600 => format!("{} minutes ago", s / 60),
        s if s < 86400 => format!("{} hours ago", s / 3600),
        s => format!("{} days ago", s / 86400),
    }
}

fn bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if n < 1024 {
        return format!("{n} B");
    }
    let mut value = n as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
