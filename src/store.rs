mod interface_file;
mod lock;

use std::{
    io,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use cidr::Ipv4Inet;
use thiserror::Error;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, instrument};

pub(crate) use interface_file::key_value;
pub use interface_file::{InterfaceFile, ParseError, PeerBlock};
pub use lock::InterfaceLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("{} must be readable and writable", .0.display())]
    PermissionDenied(PathBuf),
    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("{}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("{}: missing or invalid `{key}`", .path.display())]
    MissingField { path: PathBuf, key: &'static str },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_owned()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_owned()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_owned()),
            _ => Self::Io {
                path: path.to_owned(),
                source,
            },
        }
    }
}

/// An interface file with its `[Interface]` fields resolved.
#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub name: String,
    pub address: Ipv4Inet,
    pub listen_port: u16,
    pub private_key: String,
    pub file: InterfaceFile,
}

impl InterfaceConfig {
    fn parse(name: &str, path: &Path, text: &str) -> Result<Self> {
        let file = InterfaceFile::parse(text).map_err(|source| StoreError::Parse {
            path: path.to_owned(),
            source,
        })?;
        let missing = |key| StoreError::MissingField {
            path: path.to_owned(),
            key,
        };

        let address = file
            .interface_value("Address")
            .and_then(|v| v.split(',').find_map(|a| a.trim().parse::<Ipv4Inet>().ok()))
            .ok_or_else(|| missing("Address"))?;
        let listen_port = file
            .interface_value("ListenPort")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| missing("ListenPort"))?;
        let private_key = file
            .interface_value("PrivateKey")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| missing("PrivateKey"))?
            .to_owned();

        Ok(Self {
            name: name.to_owned(),
            address,
            listen_port,
            private_key,
            file,
        })
    }

    /// First three octets of the interface address.
    pub fn prefix(&self) -> [u8; 3] {
        let [a, b, c, _] = self.address.address().octets();
        [a, b, c]
    }

    pub fn in_subnet(&self, addr: Ipv4Addr) -> bool {
        addr.octets()[..3] == self.prefix()
    }
}

/// Flat-file storage: `<config_dir>/<name>.conf` per interface and
/// `<peer_dir>/<name>/<peer>.conf` per generated client config.
#[derive(Debug, Clone)]
pub struct Store {
    config_dir: PathBuf,
    peer_dir: PathBuf,
}

impl Store {
    pub fn new(config_dir: PathBuf, peer_dir: PathBuf) -> Self {
        Self {
            config_dir,
            peer_dir,
        }
    }

    pub fn interface_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{name}.conf"))
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!(".{name}.lock"))
    }

    pub fn peer_dir(&self, interface: &str) -> PathBuf {
        self.peer_dir.join(interface)
    }

    pub fn peer_path(&self, interface: &str, peer: &str) -> PathBuf {
        self.peer_dir(interface).join(format!("{peer}.conf"))
    }

    pub async fn interface_exists(&self, name: &str) -> bool {
        fs::try_exists(self.interface_path(name))
            .await
            .unwrap_or(false)
    }

    /// Takes the interface's exclusive lock; held until the guard drops.
    pub async fn lock(&self, name: &str) -> Result<InterfaceLock> {
        let path = self.lock_path(name);
        fs::create_dir_all(&self.config_dir)
            .await
            .map_err(|e| StoreError::io(&self.config_dir, e))?;
        InterfaceLock::acquire(path.clone())
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    /// Names of all interfaces in the config directory, sorted.
    pub async fn interfaces(&self) -> Result<Vec<String>> {
        let mut dir = fs::read_dir(&self.config_dir)
            .await
            .map_err(|e| StoreError::io(&self.config_dir, e))?;
        let mut names = Vec::new();

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.config_dir, e))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.map_or(false, |t| t.is_file());
            if is_file && path.extension().map_or(false, |e| e == "conf") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_owned());
                }
            }
        }
        names.sort();

        Ok(names)
    }

    #[instrument(skip(self))]
    pub async fn read_interface(&self, name: &str) -> Result<InterfaceConfig> {
        let path = self.interface_path(name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        let mut text = String::new();
        file.read_to_string(&mut text)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        InterfaceConfig::parse(name, &path, &text)
    }

    /// Writes a brand new interface file; fails if one exists.
    #[instrument(skip(self, text))]
    pub async fn create_interface(&self, name: &str, text: &str) -> Result<()> {
        let path = self.interface_path(name);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        file.write_all(text.as_bytes())
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    #[instrument(skip_all, fields(interface = %config.name))]
    pub async fn write_interface(&self, config: &InterfaceConfig) -> Result<()> {
        self.write_file(&config.name, &config.file).await
    }

    /// Replaces the interface file with `file`, atomically.
    pub async fn write_file(&self, name: &str, file: &InterfaceFile) -> Result<()> {
        let path = self.interface_path(name);
        write_atomic(&path, file.to_string().as_bytes())
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    /// Removes the interface file, its lock file and its peer directory.
    #[instrument(skip(self))]
    pub async fn delete_interface(&self, name: &str) -> Result<()> {
        let path = self.interface_path(name);
        fs::remove_file(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        let peers = self.peer_dir(name);
        match fs::remove_dir_all(&peers).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(StoreError::io(&peers, e))
            }
            _ => {}
        }

        if let Err(e) = fs::remove_file(self.lock_path(name)).await {
            debug!("lock file not removed: {e}");
        }

        Ok(())
    }

    pub async fn read_peer_file(&self, interface: &str, peer: &str) -> Result<String> {
        let path = self.peer_path(interface, peer);
        fs::read_to_string(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    #[instrument(skip(self, text))]
    pub async fn write_peer_file(&self, interface: &str, peer: &str, text: &str) -> Result<()> {
        let dir = self.peer_dir(interface);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let path = self.peer_path(interface, peer);
        write_atomic(&path, text.as_bytes())
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    /// Returns `false` if there was no file to delete.
    #[instrument(skip(self))]
    pub async fn delete_peer_file(&self, interface: &str, peer: &str) -> Result<bool> {
        let path = self.peer_path(interface, peer);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not a file path"))?;
    let tmp = path.with_file_name(format!(".{}.tmp", name.to_string_lossy()));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp)
        .await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await
}
