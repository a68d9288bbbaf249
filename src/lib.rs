//! Sonority is a Rust library for Discord's realtime connections.
//!
//! It covers the three pieces of a bot that have to keep running while everything else is plain
//! request/response work:
//!
//! - the [`Shard`], a single authenticated, heartbeating gateway connection which dispatches
//!   [`Event`]s to your [`EventHandler`]s and transparently resumes or re-identifies when the
//!   connection drops;
//! - the voice [`Manager`] and its [`Call`]s, which join a voice channel, negotiate a UDP media
//!   connection and move encrypted Opus frames in both directions;
//! - the [`Ratelimiter`], which REST code consults around every request so that Discord never
//!   has to throttle you.
//!
//! The [`Client`] wires all of these together:
//!
//! ```rust,no_run
//! use sonority::model::gateway::GatewayIntents;
//! use sonority::Client;
//!
//! # async fn run() -> sonority::Result<()> {
//! let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
//! let client = Client::builder("token", intents).build();
//!
//! client.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Call`]: crate::voice::Call
//! [`Client`]: crate::client::Client
//! [`Event`]: crate::model::event::Event
//! [`EventHandler`]: crate::client::EventHandler
//! [`Manager`]: crate::voice::Manager
//! [`Ratelimiter`]: crate::http::Ratelimiter
//! [`Shard`]: crate::gateway::Shard
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![forbid(unsafe_code)]
#![warn(
    unused,
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::clone_on_ref_ptr,
    clippy::non_ascii_literal,
    clippy::fallible_impl_from,
    clippy::let_underscore_must_use,
    clippy::format_push_string,
    clippy::pedantic
)]
#![allow(
    // Allowed as they are too pedantic
    clippy::cast_possible_truncation,
    clippy::module_name_repetitions,
    clippy::unreadable_literal,
    clippy::cast_possible_wrap,
    clippy::wildcard_imports,
    clippy::cast_sign_loss,
    clippy::too_many_lines,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::doc_link_with_quotes
)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

#[macro_use]
extern crate serde;

#[macro_use]
mod internal;

pub mod backoff;
pub mod cache;
pub mod client;
pub mod constants;
pub mod gateway;
pub mod heartbeat;
pub mod http;
pub mod json;
pub mod model;
pub mod prelude;
pub mod voice;
pub mod ws;

mod error;

pub use crate::client::Client;
pub use crate::error::{Error, Result};

// Re-exports of crates used internally which are already publically exposed.
pub use async_trait::async_trait;
pub use {futures, secrecy};
