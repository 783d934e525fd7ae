//! # portal-gateway
//!
//! Transport to the inference gateway: an incremental frame parser for the
//! `data: <json>` response body, a reqwest-backed [`HttpChatGateway`], and a
//! scripted [`MockGateway`] for tests.

#![deny(unsafe_code)]

pub mod client;
pub mod frame;
pub mod mock;

pub use client::{sanitize_api_key, HttpChatGateway};
pub use frame::{FrameBatch, FrameParser};
pub use mock::{MockGateway, MockResponse};
