//! User information-related models.

use serde::{Deserialize, Serialize};

use super::id::UserId;
use crate::json::JsonMap;

/// A user, as embedded in member and message payloads.
///
/// Only the identifying fields are modelled; everything else is kept verbatim in `extra`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bot: bool,
    #[serde(flatten)]
    pub extra: JsonMap,
}
