//! # haggle-history
//!
//! Conversation and item persistence for the Haggle agent.
//!
//! - [`ConversationStore`]: the persistence contract (chat history, item
//!   info cache, bargain counters)
//! - [`SqliteStore`]: the production implementation (rusqlite behind an
//!   r2d2 pool, WAL mode)

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory};
pub use errors::{Result, StoreError};
pub use store::{ChatRole, ConversationStore, SqliteStore, StoredMessage};
