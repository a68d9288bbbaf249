//! A collection of newtypes defining type-strong IDs.

use std::fmt;

use serde::de::{Error as DeError, Visitor};
use serde::{Deserialize, Serialize};

macro_rules! id_u64 {
    ($($(#[$attr:meta])* $name:ident;)*) => {
        $(
            $(#[$attr])*
            #[derive(Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
            pub struct $name(u64);

            impl $name {
                /// Creates a new Id from a u64.
                #[must_use]
                pub const fn new(id: u64) -> Self {
                    Self(id)
                }

                /// Retrieves the inner `id` as a [`u64`].
                #[must_use]
                pub const fn get(self) -> u64 {
                    self.0
                }
            }

            impl fmt::Debug for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_tuple(stringify!($name)).field(&self.0).finish()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Display::fmt(&self.0, f)
                }
            }

            impl From<u64> for $name {
                fn from(id: u64) -> Self {
                    Self(id)
                }
            }

            impl From<$name> for u64 {
                fn from(id: $name) -> u64 {
                    id.0
                }
            }

            impl Serialize for $name {
                fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.collect_str(&self.0)
                }
            }

            impl<'de> Deserialize<'de> for $name {
                fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    deserializer.deserialize_any(SnowflakeVisitor).map(Self)
                }
            }
        )*
    }
}

/// Discord sends snowflakes as strings, but older payloads and tests use plain integers.
struct SnowflakeVisitor;

impl<'de> Visitor<'de> for SnowflakeVisitor {
    type Value = u64;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a snowflake as a string or integer")
    }

    fn visit_u64<E: DeError>(self, value: u64) -> Result<Self::Value, E> {
        Ok(value)
    }

    fn visit_i64<E: DeError>(self, value: i64) -> Result<Self::Value, E> {
        u64::try_from(value).map_err(|_| E::custom("snowflake out of range"))
    }

    fn visit_str<E: DeError>(self, value: &str) -> Result<Self::Value, E> {
        value.parse().map_err(E::custom)
    }
}

id_u64! {
    /// An identifier for an Application.
    ApplicationId;
    /// An identifier for a Channel.
    ChannelId;
    /// An identifier for a Guild.
    GuildId;
    /// An identifier for a Message.
    MessageId;
    /// An identifier for a User.
    UserId;
}
