//! A WebSocket relay that fans chat messages out to everyone logged in.
//!
//! The [`relay::Relay`] holds who is present ([`registry::Registry`]) and how
//! events reach them ([`broadcaster::Broadcaster`]). Each socket drives its
//! own [`session::Session`]; [`server`] wires sessions to warp.

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod messages;
pub mod outbound;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod tls;
