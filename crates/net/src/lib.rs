//! Thesis Network Library
//!
//! TCP boundary for the thesis topic service.
//!
//! # Architecture
//!
//! - **Server**: accepts connections and dispatches calls to a [`TopicService`]
//! - **Client**: issues calls over one connection, matching replies by id
//! - **Protocol**: Length-prefixed JSON messages
//!
//! # Usage
//!
//! ```ignore
//! let server = Server::start(DEFAULT_PORT, Arc::new(service), DEFAULT_MAX_CONNECTIONS).await?;
//!
//! let client = Client::connect(addr, token).await?;
//! let topic = client.set_status(topic_id, "Zarezerwowany").await?;
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use client::{Client, ConnectionState};
pub use error::{Error, Result};
pub use protocol::{
    ErrorKind, Message, Outcome, Request, StudentRef, TopicView, WireError, STATUS_LITERALS,
};
pub use server::{Server, TopicService, DEFAULT_MAX_CONNECTIONS};

/// Default port for thesis servers
pub const DEFAULT_PORT: u16 = 7340;
