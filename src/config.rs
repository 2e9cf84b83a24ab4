//! Relay configuration: TOML file on disk, overridable from the CLI.
//!
//! Mirrors the teacher's config shape (a `Cli` struct holding just the
//! config file path, a `Config` struct holding everything else) but the
//! field set is the relay's own: socket binds, router control-plane
//! coordinates and the relay's long-term keypair.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use serde::Deserialize;

use relay_codec::Address;

fn default_threads() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

fn default_sessions_capacity() -> usize {
    65536
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_init_attempts() -> u32 {
    30
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    /// Public socket: receives client/server game traffic.
    pub bind: SocketAddr,
    /// Internal socket: receives relay-to-relay mesh traffic (pings,
    /// forwarded hops between relays on a private network).
    pub internal_bind: SocketAddr,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_sessions_capacity")]
    pub session_capacity: usize,
}

fn parse_key32(value: &str) -> Result<[u8; 32], String> {
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, value)
        .map_err(|e| format!("invalid base64 key: {e}"))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| "key must decode to exactly 32 bytes".into())
}

/// Deserializes a base64-encoded 32-byte key directly into `[u8; 32]`.
pub mod key32 {
    use super::parse_key32;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_key32(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Router {
    /// Base URL of the session/router backend, e.g. `https://router.example.net`.
    pub base_url: String,
    /// Name this relay identifies itself as in `relay_init` / `relay_update`.
    pub relay_name: String,
    /// This relay's long-term X25519 secret key, used to open the route
    /// and continue tokens the router seals to it.
    #[serde(with = "key32")]
    pub relay_secret_key: [u8; 32],
    /// The router's long-term public key: the sender side of every route
    /// and continue token this relay opens (paired with `relay_secret_key`),
    /// and also the key peer-list updates would be verified against if
    /// `relay_update` ever started signing them.
    #[serde(with = "key32")]
    pub router_public_key: [u8; 32],
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_init_attempts")]
    pub max_init_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: Server,
    pub router: Router,
    #[serde(default)]
    pub log: Log,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let cli = Cli::parse();
        let raw = std::fs::read_to_string(&cli.config)
            .map_err(|e| anyhow::anyhow!("failed to read config file {:?}: {e}", cli.config))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {:?}: {e}", cli.config))?;
        Ok(config)
    }
}

impl Server {
    pub fn bind_address(&self) -> Address {
        Address::from(self.bind)
    }

    pub fn internal_bind_address(&self) -> Address {
        Address::from(self.internal_bind)
    }
}

#[derive(Debug, Parser)]
#[command(name = "relay-node", about = "Encrypted multi-hop UDP relay node")]
struct Cli {
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,
}
