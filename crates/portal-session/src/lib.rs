//! # portal-session
//!
//! The chat turn engine. [`ChatSession`] sends a turn to the gateway, decodes
//! the streamed frames, commits throttled content to the displayed message
//! list and reconciles optimistic entries with their persisted versions.
//!
//! The pieces it is built from are usable on their own:
//! - [`MessageReconciler`]: optimistic insert, id swap, rollback
//! - [`StreamThrottle`]: coalesced content flushes
//! - [`ContextUsageTracker`]: per-model token ledgers
//! - [`ResearchActivator`]: deep-research job detection

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod reconciler;
pub mod research;
pub mod throttle;
pub mod tools;
pub mod usage;

pub use config::{ModelSelection, SessionConfig, TurnOptions};
pub use error::SessionError;
pub use orchestrator::{ChatSession, SessionState, TurnOutcome};
pub use reconciler::{Entry, EntryState, MessageReconciler};
pub use research::{ResearchActivator, ResearchUpdate};
pub use throttle::StreamThrottle;
pub use usage::ContextUsageTracker;
