//! RelayMQ broker front door.
//!
//! This crate accepts client connections, drives connection authentication
//! through `relaymq-auth` and exposes the tenant property listing from
//! `relaymq-admin` to authenticated clients.

pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod protocol;

pub use config::{Args, BrokerConfig};
pub use connection::{BrokerContext, Connection};
pub use error::Error;
pub use listener::Broker;
pub use protocol::{ClientCommand, ServerReply};
