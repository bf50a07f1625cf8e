use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Real-time chat broadcast relay
#[derive(Parser, Clone, Debug)]
#[command(name = "chat-relay", version, about = "Real-time chat broadcast relay")]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory served for plain HTTP requests
    #[arg(long, env = "RELAY_STATIC_DIR", default_value = "public")]
    pub static_dir: PathBuf,

    /// Outbound messages buffered per connection before new ones are dropped
    #[arg(long, env = "RELAY_OUTBOUND_CAPACITY", default_value_t = 64)]
    pub outbound_capacity: usize,

    /// Invalid messages tolerated before a connection is closed (0 = never)
    #[arg(long, env = "RELAY_MAX_VIOLATIONS", default_value_t = 5)]
    pub max_violations: u32,

    /// Largest inbound WebSocket message accepted, in bytes
    #[arg(long, env = "RELAY_MAX_MESSAGE_BYTES", default_value_t = 64 * 1024)]
    pub max_message_bytes: usize,

    /// PEM certificate chain; enables TLS together with --tls-key
    #[arg(long, env = "RELAY_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key; enables TLS together with --tls-cert
    #[arg(long, env = "RELAY_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Certificate and key paths, when both are configured.
    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_cert.as_ref().zip(self.tls_key.as_ref())
    }
}
