use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tracing::debug;

use super::{Context, EventHandler};
use crate::internal::tokio::spawn_named;
use crate::model::event::Event;

/// How event handler tasks are spawned.
///
/// Handlers always run in tasks of their own, so the dispatcher never waits for them. The policy
/// only decides how many of those tasks may run at once.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum HandlerPolicy {
    /// Every dispatch starts running its handlers immediately.
    ///
    /// A burst of events becomes a burst of concurrently running tasks.
    #[default]
    Unbounded,
    /// At most this many handler invocations run at once; the rest wait for a free slot.
    ///
    /// Waiting happens inside the spawned tasks, never in the dispatcher. A limit of zero is
    /// treated as one.
    Bounded(usize),
}

/// The handlers registered on a shard, and the policy they are run with.
pub(crate) struct HandlerRegistry {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    permits: Option<Arc<Semaphore>>,
}

impl HandlerRegistry {
    pub fn new(policy: HandlerPolicy) -> Self {
        let permits = match policy {
            HandlerPolicy::Unbounded => None,
            HandlerPolicy::Bounded(limit) => Some(Arc::new(Semaphore::new(limit.max(1)))),
        };

        Self {
            handlers: RwLock::new(Vec::new()),
            permits,
        }
    }

    pub fn add(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Spawns one task per registered handler for `event`, without waiting for any of them.
    pub fn dispatch(&self, context: Context, event: Event) {
        let handlers = self.handlers.read().clone();

        if handlers.is_empty() {
            return;
        }

        let event = Arc::new(event);

        for handler in handlers {
            let context = context.clone();
            let event = Arc::clone(&event);
            let permits = self.permits.clone();

            spawn_named("dispatch::event_handler", async move {
                let _permit = match permits {
                    Some(permits) => match permits.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(why) => {
                            debug!("Handler slots closed: {}", why);
                            return;
                        },
                    },
                    None => None,
                };

                dispatch_event(context, &event, &*handler).await;
            });
        }
    }
}

/// Calls the handler method matching `event`.
async fn dispatch_event(ctx: Context, event: &Event, handler: &dyn EventHandler) {
    match event {
        Event::Ready(ready) => handler.ready(ctx, ready).await,
        Event::Resumed => handler.resume(ctx).await,
        Event::ChannelCreate(channel) => handler.channel_create(ctx, channel).await,
        Event::ChannelUpdate(channel) => handler.channel_update(ctx, channel).await,
        Event::ChannelDelete(channel) => handler.channel_delete(ctx, channel).await,
        Event::GuildCreate(guild) => handler.guild_create(ctx, guild).await,
        Event::GuildUpdate(guild) => handler.guild_update(ctx, guild).await,
        Event::GuildDelete(guild) => handler.guild_delete(ctx, guild).await,
        Event::GuildMemberAdd(member) => handler.guild_member_addition(ctx, member).await,
        Event::GuildMemberUpdate(member) => handler.guild_member_update(ctx, member).await,
        Event::GuildMemberRemove(removal) => {
            handler.guild_member_removal(ctx, removal.guild_id, &removal.user).await;
        },
        Event::GuildMembersChunk(chunk) => handler.guild_members_chunk(ctx, chunk).await,
        Event::MessageCreate(message) => handler.message(ctx, message).await,
        Event::VoiceStateUpdate(state) => handler.voice_state_update(ctx, state).await,
        Event::VoiceServerUpdate(update) => handler.voice_server_update(ctx, update).await,
        Event::Unknown(unknown) => handler.unknown(ctx, &unknown.name, &unknown.raw).await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::gateway::{Shard, ShardConfig};
    use crate::model::gateway::GatewayIntents;

    struct Slow {
        running: AtomicUsize,
        peak: AtomicUsize,
        done: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl EventHandler for Slow {
        async fn resume(&self, _: Context) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(10)).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            self.done.send(()).unwrap();
        }
    }

    async fn peak_concurrency(policy: HandlerPolicy) -> usize {
        let (done, mut finished) = mpsc::unbounded_channel();
        let handler = Arc::new(Slow {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            done,
        });

        let registry = HandlerRegistry::new(policy);
        registry.add(Arc::clone(&handler) as Arc<dyn EventHandler>);

        let shard = Shard::new(ShardConfig::new("token", GatewayIntents::empty()));
        for _ in 0..6 {
            registry.dispatch(Context::new(shard.messenger()), Event::Resumed);
        }

        for _ in 0..6 {
            finished.recv().await.unwrap();
        }

        handler.peak.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_policy_runs_everything_at_once() {
        assert_eq!(peak_concurrency(HandlerPolicy::Unbounded).await, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_policy_limits_concurrency() {
        assert_eq!(peak_concurrency(HandlerPolicy::Bounded(2)).await, 2);
        assert_eq!(peak_concurrency(HandlerPolicy::Bounded(0)).await, 1);
    }
}
