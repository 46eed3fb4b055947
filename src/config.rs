use std::{fs::read_to_string, net::SocketAddr};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    ///
    /// signaling server listen address
    ///
    /// The address and port the WebSocket listener is bound to.
    ///
    #[serde(default = "Server::listen")]
    pub listen: SocketAddr,
    ///
    /// advertised subprotocols, ordered by preference
    ///
    #[serde(default = "Server::subprotocols")]
    pub subprotocols: Vec<String>,
    ///
    /// permanent secret keys
    ///
    /// Hex-encoded X25519 secret keys identifying this server to its
    /// clients. The first key is the primary one; additional keys allow
    /// key rotation. May be empty, in which case clients cannot pin the
    /// server's identity.
    ///
    #[serde(default)]
    pub keys: Vec<String>,
}

impl Server {
    fn listen() -> SocketAddr {
        "0.0.0.0:8765".parse().unwrap()
    }

    fn subprotocols() -> Vec<String> {
        vec![service::SUBPROTOCOL.to_string()]
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            subprotocols: Self::subprotocols(),
            keys: Default::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Signaling {
    ///
    /// keep-alive interval in seconds
    ///
    /// How often the server pings an idle client. Clients may request a
    /// shorter interval during the handshake.
    ///
    #[serde(default = "Signaling::keep_alive_interval")]
    pub keep_alive_interval: u64,
    ///
    /// keep-alive timeout in seconds
    ///
    /// How long the server waits for a pong before dropping the client.
    ///
    #[serde(default = "Signaling::keep_alive_timeout")]
    pub keep_alive_timeout: u64,
    ///
    /// relay timeout in seconds
    ///
    /// How long a relayed message may wait for the destination's send to
    /// complete before a send-error is returned to the sender.
    ///
    #[serde(default = "Signaling::relay_timeout")]
    pub relay_timeout: u64,
}

impl Signaling {
    fn keep_alive_interval() -> u64 {
        service::KEEP_ALIVE_INTERVAL_DEFAULT.as_secs()
    }

    fn keep_alive_timeout() -> u64 {
        service::KEEP_ALIVE_TIMEOUT_DEFAULT.as_secs()
    }

    fn relay_timeout() -> u64 {
        service::RELAY_TIMEOUT_DEFAULT.as_secs()
    }
}

impl Default for Signaling {
    fn default() -> Self {
        Self {
            keep_alive_interval: Self::keep_alive_interval(),
            keep_alive_timeout: Self::keep_alive_timeout(),
            relay_timeout: Self::relay_timeout(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
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
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub signaling: Signaling,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: saltyrtc-server --config /etc/saltyrtc/config.toml
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    pub fn load() -> Result<Self> {
        Ok(toml::from_str::<Self>(&read_to_string(
            &Cli::parse().config,
        )?)?)
    }
}
