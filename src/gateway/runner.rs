//! The tasks which keep a connected shard running, and the supervisor which replaces them after
//! a failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::shard::{invalid_session_delay, ShardInner};
use super::{ConnectionStage, GatewayError, ShardMessenger};
use crate::cache;
use crate::client::Context;
use crate::constants::{close_codes, Opcode};
use crate::heartbeat::{self, Heartbeat};
use crate::internal::prelude::*;
use crate::internal::tokio::spawn_named;
use crate::model::event::Event;
use crate::ws::{Frame, Payload, WsReader, WsWriter};

/// A freshly handshaken connection.
pub(super) struct Connection {
    pub reader: WsReader,
    pub writer: Arc<WsWriter>,
    pub interval: Duration,
    /// Dispatches received during the handshake, READY or RESUMED last.
    pub backlog: Vec<Payload>,
}

/// Why a running connection has to be replaced.
#[derive(Debug)]
enum Failure {
    Error(Error),
    /// Discord asked for a reconnect (op 7).
    Reconnect,
    /// Discord invalidated the session (op 9).
    InvalidSession { resumable: bool },
}

/// Reports a failure to the supervisor; only the first one of a connection matters.
fn report(failures: &mpsc::Sender<Failure>, failure: Failure) {
    if let Err(why) = failures.try_send(failure) {
        debug!("Failure not reported, supervisor already notified: {:?}", why);
    }
}

struct GatewayHeart {
    inner: Arc<ShardInner>,
    writer: Arc<WsWriter>,
}

#[async_trait]
impl Heartbeat for GatewayHeart {
    async fn beat(&mut self) -> Result<()> {
        let seq = self.inner.state.lock().last_sequence();
        self.writer.send_heartbeat(self.inner.config.shard, seq).await
    }

    fn stale(&self) -> Error {
        Error::Gateway(GatewayError::HeartbeatStale)
    }
}

/// The tasks of one connection.
struct Running {
    stop: CancellationToken,
    writer: Arc<WsWriter>,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    fn start(
        inner: &Arc<ShardInner>,
        connection: Connection,
        parent: &CancellationToken,
        failures: &mpsc::Sender<Failure>,
    ) -> Self {
        let Connection {
            mut reader,
            writer,
            interval,
            backlog,
        } = connection;
        let shard = inner.config.shard;
        let stop = parent.child_token();

        *inner.writer.write() = Some(Arc::clone(&writer));

        let heartbeater = {
            let inner = Arc::clone(inner);
            let heart = GatewayHeart {
                inner: Arc::clone(&inner),
                writer: Arc::clone(&writer),
            };
            let first_beat = interval.mul_f64(rand::random::<f64>());
            let stop = stop.clone();
            let failures = failures.clone();

            spawn_named("shard::heartbeat", async move {
                let result =
                    heartbeat::run(heart, &inner.heartbeat, interval, first_beat, &stop).await;

                if let Err(why) = result {
                    report(&failures, Failure::Error(why));
                }
            })
        };

        let (payloads, mut incoming) = mpsc::unbounded_channel();

        let receiver = {
            let stop = stop.clone();
            let failures = failures.clone();

            spawn_named("shard::receiver", async move {
                loop {
                    let frame = tokio::select! {
                        () = stop.cancelled() => return,
                        frame = reader.recv() => frame,
                    };

                    match frame {
                        Ok(Frame::Payload(payload)) => {
                            if payloads.send(payload).is_err() {
                                return;
                            }
                        },
                        Ok(Frame::Close(frame)) => {
                            info!("[Shard {}] Gateway closed the connection: {:?}", shard, frame);
                            report(&failures, Failure::Error(GatewayError::from_close(frame).into()));
                            return;
                        },
                        Err(Error::Json(why)) => {
                            warn!("[Shard {}] Skipping malformed payload: {}", shard, why);
                        },
                        Err(why) => {
                            report(&failures, Failure::Error(why));
                            return;
                        },
                    }
                }
            })
        };

        let dispatcher = {
            let dispatcher = Dispatcher {
                inner: Arc::clone(inner),
                writer: Arc::clone(&writer),
                messenger: ShardMessenger::new(inner),
                failures: failures.clone(),
            };
            let stop = stop.clone();

            spawn_named("shard::dispatcher", async move {
                for payload in backlog {
                    dispatcher.handle(payload).await;
                }

                loop {
                    let payload = tokio::select! {
                        () = stop.cancelled() => return,
                        payload = incoming.recv() => payload,
                    };

                    match payload {
                        Some(payload) => dispatcher.handle(payload).await,
                        None => return,
                    }
                }
            })
        };

        Self {
            stop,
            writer,
            tasks: vec![heartbeater, receiver, dispatcher],
        }
    }

    /// Stops every task and waits for them, then closes the socket with `code`.
    async fn stop(self, inner: &ShardInner, code: u16) {
        self.stop.cancel();

        for task in self.tasks {
            if let Err(why) = task.await {
                warn!("[Shard {}] Task panicked: {:?}", inner.config.shard, why);
            }
        }

        inner.writer.write().take();

        if let Err(why) = self.writer.close(code, "").await {
            debug!("[Shard {}] Error closing the socket: {}", inner.config.shard, why);
        }
    }
}

struct Dispatcher {
    inner: Arc<ShardInner>,
    writer: Arc<WsWriter>,
    messenger: ShardMessenger,
    failures: mpsc::Sender<Failure>,
}

impl Dispatcher {
    async fn handle(&self, payload: Payload) {
        let shard = self.inner.config.shard;

        match Opcode::from(payload.op) {
            Opcode::Dispatch => self.dispatch(payload).await,
            Opcode::Heartbeat => {
                let seq = self.inner.state.lock().last_sequence();

                if let Err(why) = self.writer.send_heartbeat(shard, seq).await {
                    report(&self.failures, Failure::Error(why));
                }
            },
            Opcode::HeartbeatAck => self.inner.heartbeat.record_ack(),
            Opcode::Reconnect => report(&self.failures, Failure::Reconnect),
            Opcode::InvalidSession => {
                let resumable = payload.data::<Option<bool>>().ok().flatten().unwrap_or(false);
                report(&self.failures, Failure::InvalidSession {
                    resumable,
                });
            },
            Opcode::Hello => debug!("[Shard {}] Ignoring Hello on a running connection", shard),
            other => warn!("[Shard {}] Unhandled opcode: {:?}", shard, other),
        }
    }

    async fn dispatch(&self, payload: Payload) {
        let shard = self.inner.config.shard;

        if let Some(seq) = payload.s {
            self.inner.state.lock().observe_sequence(seq);
        }

        let Some(name) = payload.t.as_deref() else {
            warn!("[Shard {}] Dispatch without an event name", shard);
            return;
        };

        let event = match Event::decode(name, payload.raw_data()) {
            Ok(event) => event,
            Err(why) => {
                warn!("[Shard {}] Failed to decode {}: {}", shard, name, why);
                return;
            },
        };

        if let Event::Unknown(unknown) = &event {
            debug!("[Shard {}] Unknown dispatch {}: {}", shard, unknown.name, unknown.raw);
        }

        let hooks = self.inner.hooks();

        if let Some(cache) = &hooks.cache {
            cache::update(&**cache, &event);
        }

        if let Some(voice) = &hooks.voice {
            match &event {
                Event::Ready(ready) => voice.initialise(shard, ready.user.id).await,
                Event::VoiceStateUpdate(state) => {
                    if let Some(guild_id) = state.guild_id {
                        voice.state_update(guild_id, state).await;
                    }
                },
                Event::VoiceServerUpdate(update) => {
                    voice
                        .server_update(update.guild_id, update.endpoint.as_deref(), &update.token)
                        .await;
                },
                _ => {},
            }
        }

        let context = Context::new(self.messenger.clone());
        self.inner.handlers.dispatch(context, event);
    }
}

/// Runs a shard until it is shut down or refused for good.
///
/// Every failure of the running connection is answered with a reconnect: a resume while the
/// session is valid, an identify otherwise.
pub(super) async fn supervise(
    inner: Arc<ShardInner>,
    connection: Connection,
    shutdown: CancellationToken,
) {
    let shard = inner.config.shard;
    let mut connection = connection;

    loop {
        let (failures, mut failed) = mpsc::channel(4);
        let running = Running::start(&inner, connection, &shutdown, &failures);
        drop(failures);

        let failure = tokio::select! {
            biased;
            () = shutdown.cancelled() => None,
            failure = failed.recv() => Some(failure.unwrap_or(Failure::Error(GatewayError::Closed(None).into()))),
        };

        let Some(failure) = failure else {
            running.stop(&inner, close_codes::NORMAL).await;
            return;
        };

        running.stop(&inner, close_codes::UNKNOWN_ERROR).await;

        match failure {
            Failure::Error(why) => {
                inner.report_error(&why);

                if let Error::Gateway(gateway) = &why {
                    if gateway.is_permanent() {
                        inner.state.lock().mark_disconnected();
                        return;
                    }

                    if gateway.invalidates_session() {
                        inner.state.lock().clear_session();
                    }
                }
            },
            Failure::Reconnect => info!("[Shard {}] Gateway requested a reconnect", shard),
            Failure::InvalidSession {
                resumable: true,
            } => info!("[Shard {}] Session invalidated, resuming", shard),
            Failure::InvalidSession {
                resumable: false,
            } => {
                info!("[Shard {}] Session invalidated, identifying", shard);
                inner.state.lock().clear_session();

                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => return,
                    () = sleep(invalid_session_delay()) => {},
                }
            },
        }

        if let Err(why) = inner.state.lock().advance(ConnectionStage::Reconnecting) {
            warn!("[Shard {}] {}", shard, why);
        }

        connection = match reconnect(&inner, &shutdown).await {
            Some(connection) => connection,
            None => return,
        };
    }
}

/// Opens connections with backoff until one succeeds, the shard is refused or shut down.
async fn reconnect(inner: &ShardInner, shutdown: &CancellationToken) -> Option<Connection> {
    let shard = inner.config.shard;
    let mut attempt = 0;

    loop {
        let delay = inner.config.backoff.delay(attempt);
        info!("[Shard {}] Reconnecting in {:?}", shard, delay);

        tokio::select! {
            biased;
            () = shutdown.cancelled() => return None,
            () = sleep(delay) => {},
        }

        if let Err(why) = inner.state.lock().advance(ConnectionStage::Connecting) {
            warn!("[Shard {}] {}", shard, why);
        }

        let result = tokio::select! {
            biased;
            () = shutdown.cancelled() => return None,
            result = inner.open() => result,
        };

        let why = match result {
            Ok(connection) => return Some(connection),
            Err(why) => why,
        };

        if let Error::Gateway(gateway) = &why {
            if gateway.is_permanent() {
                inner.report_error(&why);
                inner.state.lock().mark_disconnected();
                return None;
            }

            if gateway.invalidates_session() {
                inner.state.lock().clear_session();
            }
        }

        warn!("[Shard {}] Reconnect attempt {} failed: {}", shard, attempt + 1, why);

        if let Err(why) = inner.state.lock().advance(ConnectionStage::Reconnecting) {
            warn!("[Shard {}] {}", shard, why);
        }

        attempt = attempt.saturating_add(1);
    }
}
