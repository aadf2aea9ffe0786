use std::process::Stdio;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::ValueEnum;
use rand::rngs::OsRng;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::instrument;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::traits::KeyProvider;

pub const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key")]
    InvalidKey,
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` failed: {message}")]
    Tool { program: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Keygen {
    /// Curve25519 in process.
    Builtin,
    /// `wg genkey` / `wg pubkey`.
    Wg,
}

impl Keygen {
    pub fn provider(self) -> Box<dyn KeyProvider> {
        match self {
            Keygen::Builtin => Box::new(BuiltinKeys),
            Keygen::Wg => Box::new(WgKeys::default()),
        }
    }
}

pub fn decode_key(key: &str) -> Result<[u8; KEY_LEN], KeyError> {
    STANDARD
        .decode(key.trim())
        .ok()
        .and_then(|k| k.try_into().ok())
        .ok_or(KeyError::InvalidKey)
}

pub fn encode_key(key: &[u8; KEY_LEN]) -> String {
    STANDARD.encode(key)
}

pub struct BuiltinKeys;

#[async_trait]
impl KeyProvider for BuiltinKeys {
    async fn generate_private_key(&self) -> Result<String, KeyError> {
        let private = StaticSecret::random_from_rng(OsRng);
        Ok(encode_key(&private.to_bytes()))
    }

    async fn derive_public_key(&self, private_key: &str) -> Result<String, KeyError> {
        let private = StaticSecret::from(decode_key(private_key)?);
        Ok(encode_key(PublicKey::from(&private).as_bytes()))
    }
}

/// Delegates to the `wg` tool.
pub struct WgKeys {
    program: String,
}

impl Default for WgKeys {
    fn default() -> Self {
        Self {
            program: "wg".to_owned(),
        }
    }
}

impl WgKeys {
    async fn run(&self, arg: &str, input: Option<&str>) -> Result<String, KeyError> {
        let spawn_err = |source| KeyError::Spawn {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .arg(arg)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(format!("{input}\n").as_bytes())
                .await
                .map_err(spawn_err)?;
        }

        let output = child.wait_with_output().await.map_err(spawn_err)?;
        if !output.status.success() {
            return Err(KeyError::Tool {
                program: format!("{} {arg}", self.program),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let key = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        decode_key(&key)?;
        Ok(key)
    }
}

#[async_trait]
impl KeyProvider for WgKeys {
    #[instrument(skip(self))]
    async fn generate_private_key(&self) -> Result<String, KeyError> {
        self.run("genkey", None).await
    }

    #[instrument(skip_all)]
    async fn derive_public_key(&self, private_key: &str) -> Result<String, KeyError> {
        decode_key(private_key)?;
        self.run("pubkey", Some(private_key.trim())).await
    }
}
