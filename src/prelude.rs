//! A set of exports which can be helpful to use.
//!
//! Note that the `SonorityError` re-export is equivalent to [`sonority::Error`], although is
//! re-exported as a separate name to remove likely ambiguity with other crate error enums.
//!
//! # Examples
//!
//! Import all of the exports:
//!
//! ```rust
//! use sonority::prelude::*;
//! ```
//!
//! [`sonority::Error`]: crate::Error

pub use crate::client::{Client, Context, EventHandler};
pub use crate::error::Error as SonorityError;
pub use crate::gateway::{GatewayError, Shard, ShardMessenger};
pub use crate::http::HttpError;
pub use crate::model::gateway::GatewayIntents;
pub use crate::voice::{Call, VoiceError};
