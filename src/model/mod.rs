//! Mappings of objects received from the gateway.
//!
//! Only the parts of Discord's models which the realtime engine itself depends on are given
//! fields; the remainder of each object is preserved as raw JSON.

pub mod channel;
pub mod event;
pub mod gateway;
pub mod guild;
pub mod id;
pub mod prelude;
pub mod user;
pub mod voice;
