use std::fmt;

use crate::gateway::ShardMessenger;
use crate::internal::prelude::*;
use crate::model::gateway::{ActivityData, OnlineStatus, PresenceData, ShardInfo};

/// The context is a general utility struct provided on event dispatches, which helps with dealing
/// with the current "context" of the event dispatch.
///
/// It gives access to the shard which received the event, for commands such as presence updates.
/// A context only lives for the event it was dispatched for.
#[derive(Clone)]
pub struct Context {
    /// A handle to the shard which received the event.
    pub shard: ShardMessenger,
    /// The shard which received the event.
    pub shard_info: ShardInfo,
}

impl Context {
    pub(crate) fn new(shard: ShardMessenger) -> Self {
        let shard_info = shard.shard_info();

        Self {
            shard,
            shard_info,
        }
    }

    /// Sets the current user as playing `activity` with the given `status`.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use sonority::client::{Context, EventHandler};
    /// # use sonority::model::gateway::{ActivityData, OnlineStatus, Ready};
    /// # struct Handler;
    /// #[sonority::async_trait]
    /// impl EventHandler for Handler {
    ///     async fn ready(&self, ctx: Context, _: &Ready) {
    ///         let activity = ActivityData::playing("Heroes of the Storm");
    ///
    ///         if let Err(why) = ctx.set_presence(Some(activity), OnlineStatus::Idle).await {
    ///             println!("Error setting the presence: {why}");
    ///         }
    ///     }
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if the shard lost its connection in the meantime.
    ///
    /// [`GatewayError::NotConnected`]: crate::gateway::GatewayError::NotConnected
    pub async fn set_presence(
        &self,
        activity: Option<ActivityData>,
        status: OnlineStatus,
    ) -> Result<()> {
        let presence = PresenceData {
            activity,
            status,
        };

        self.shard.set_presence(&presence).await
    }

    /// Sets the current user's status to invisible, keeping no activity.
    ///
    /// # Errors
    ///
    /// See [`Self::set_presence`].
    pub async fn invisible(&self) -> Result<()> {
        self.set_presence(None, OnlineStatus::Invisible).await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("shard_info", &self.shard_info).finish_non_exhaustive()
    }
}
