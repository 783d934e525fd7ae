//! # portal-store
//!
//! SQLite persistence for chat messages and per-model token usage.
//!
//! [`SqliteConversationStore`] implements the engine's
//! [`ConversationStore`](portal_core::store::ConversationStore) on top of two
//! synchronous repositories sharing one connection.

#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod messages;
pub mod model_contexts;
pub mod row_helpers;
pub mod schema;
pub mod sqlite_store;

pub use database::Database;
pub use error::StoreError;
pub use sqlite_store::SqliteConversationStore;
