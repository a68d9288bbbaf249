//! The tasks which keep a call connected: heartbeats on both sockets, the websocket receiver and
//! the two audio pipelines. The supervisor replaces them after a failure.

use std::sync::Arc;

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::call::{CallInner, VoiceStage};
use super::connection::{Connection, Transport};
use super::constants::{FRAME_LEN, SILENT_FRAME, UDP_KEEPALIVE_LEN, VOICE_PACKET_MAX};
use super::events::VoiceEvent;
use super::payload::{ClientDisconnect, SpeakingUpdate};
use super::rtp;
use super::{CloseCode, VoiceError, VoiceOpcode};
use crate::constants::close_codes;
use crate::heartbeat::{self, Heartbeat};
use crate::internal::prelude::*;
use crate::internal::tokio::spawn_named;
use crate::ws::{close_code, Frame, Payload, WsReader, WsWriter};

type Failures = mpsc::Receiver<Error>;

/// Reports a failure to the supervisor; only the first one of a connection matters.
fn report(failures: &mpsc::Sender<Error>, why: Error) {
    if let Err(why) = failures.try_send(why) {
        debug!("Failure not reported, supervisor already notified: {:?}", why);
    }
}

struct WsHeart {
    writer: Arc<WsWriter>,
}

#[async_trait]
impl Heartbeat for WsHeart {
    async fn beat(&mut self) -> Result<()> {
        let nonce = chrono::Utc::now().timestamp_millis();
        self.writer.send_json(VoiceOpcode::Heartbeat, &nonce).await
    }

    fn stale(&self) -> Error {
        VoiceError::HeartbeatStale.into()
    }
}

/// Sends the keepalive counter over UDP; Discord echoes it back.
struct UdpHeart {
    transport: Arc<Transport>,
    counter: u64,
}

#[async_trait]
impl Heartbeat for UdpHeart {
    async fn beat(&mut self) -> Result<()> {
        let mut bytes = [0; UDP_KEEPALIVE_LEN];
        LittleEndian::write_u64(&mut bytes, self.counter);
        self.counter = self.counter.wrapping_add(1);

        self.transport.udp.send(&bytes).await?;
        Ok(())
    }

    fn stale(&self) -> Error {
        VoiceError::HeartbeatStale.into()
    }
}

/// The tasks of one connection.
pub(super) struct Running {
    stop: CancellationToken,
    writer: Arc<WsWriter>,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    /// Spawns every task of `connection`.
    ///
    /// The returned signals fire once the audio pipelines are running. The sender holds back
    /// queued audio until the returned `primed` sender fires.
    fn start(
        inner: &Arc<CallInner>,
        connection: Connection,
        failures: &mpsc::Sender<Error>,
    ) -> (Self, [oneshot::Receiver<()>; 2], oneshot::Sender<()>) {
        let Connection {
            reader,
            writer,
            interval,
            transport,
            ..
        } = connection;
        let stop = inner.closing.child_token();

        inner.ws_heartbeat.reset();
        inner.udp_heartbeat.reset();
        *inner.writer.write() = Some(Arc::clone(&writer));

        let ws_heartbeat = {
            let inner = Arc::clone(inner);
            let heart = WsHeart {
                writer: Arc::clone(&writer),
            };
            let stop = stop.clone();
            let failures = failures.clone();

            spawn_named("voice::heartbeat", async move {
                let result =
                    heartbeat::run(heart, &inner.ws_heartbeat, interval, interval, &stop).await;

                if let Err(why) = result {
                    report(&failures, why);
                }
            })
        };

        let udp_keepalive = {
            let inner = Arc::clone(inner);
            let heart = UdpHeart {
                transport: Arc::clone(&transport),
                counter: 0,
            };
            let keepalive = inner.config.udp_keepalive;
            let stop = stop.clone();
            let failures = failures.clone();

            spawn_named("voice::udp_keepalive", async move {
                let result =
                    heartbeat::run(heart, &inner.udp_heartbeat, keepalive, keepalive, &stop).await;

                if let Err(why) = result {
                    report(&failures, why);
                }
            })
        };

        let receiver = spawn_named(
            "voice::ws_receiver",
            receive_payloads(Arc::clone(inner), reader, stop.clone(), failures.clone()),
        );

        let (udp_ready, udp_started) = oneshot::channel();
        let udp_receiver = spawn_named(
            "voice::udp_receiver",
            receive_audio(
                Arc::clone(inner),
                Arc::clone(&transport),
                stop.clone(),
                failures.clone(),
                udp_ready,
            ),
        );

        let (sender_ready, sender_started) = oneshot::channel();
        let (primed, sender_primed) = oneshot::channel();
        let sender = spawn_named(
            "voice::sender",
            send_audio(
                Arc::clone(inner),
                transport,
                stop.clone(),
                failures.clone(),
                sender_ready,
                sender_primed,
            ),
        );

        let running = Self {
            stop,
            writer,
            tasks: vec![ws_heartbeat, udp_keepalive, receiver, udp_receiver, sender],
        };

        (running, [udp_started, sender_started], primed)
    }

    /// Stops every task and waits for them, then closes the socket with `code`.
    async fn stop(self, inner: &CallInner, code: u16) {
        self.stop.cancel();

        for task in self.tasks {
            if let Err(why) = task.await {
                warn!("[Voice {}] Task panicked: {:?}", inner.guild_id, why);
            }
        }

        inner.writer.write().take();

        if let Err(why) = self.writer.close(code, "").await {
            debug!("[Voice {}] Error closing the socket: {}", inner.guild_id, why);
        }
    }
}

async fn receive_payloads(
    inner: Arc<CallInner>,
    mut reader: WsReader,
    stop: CancellationToken,
    failures: mpsc::Sender<Error>,
) {
    let guild_id = inner.guild_id;

    loop {
        let frame = tokio::select! {
            () = stop.cancelled() => return,
            frame = reader.recv() => frame,
        };

        match frame {
            Ok(Frame::Payload(payload)) => handle_payload(&inner, &payload),
            Ok(Frame::Close(frame)) => {
                info!("[Voice {}] Voice server closed the connection: {:?}", guild_id, frame);
                let code = close_code(frame.as_ref()).map(CloseCode::from);
                report(&failures, VoiceError::Closed(code).into());
                return;
            },
            Err(Error::Json(why)) => {
                warn!("[Voice {}] Skipping malformed payload: {}", guild_id, why);
            },
            Err(why) => {
                report(&failures, why);
                return;
            },
        }
    }
}

fn handle_payload(inner: &CallInner, payload: &Payload) {
    let guild_id = inner.guild_id;

    match VoiceOpcode::from(payload.op) {
        VoiceOpcode::HeartbeatAck => inner.ws_heartbeat.record_ack(),
        VoiceOpcode::Speaking => match payload.data::<SpeakingUpdate>() {
            Ok(update) => inner.emit(VoiceEvent::Speaking {
                user_id: update.user_id,
                ssrc: update.ssrc,
                speaking: update.speaking != 0,
            }),
            Err(why) => warn!("[Voice {}] Malformed speaking update: {}", guild_id, why),
        },
        VoiceOpcode::ClientDisconnect => match payload.data::<ClientDisconnect>() {
            Ok(disconnect) => inner.emit(VoiceEvent::ClientDisconnect {
                user_id: disconnect.user_id,
            }),
            Err(why) => warn!("[Voice {}] Malformed client disconnect: {}", guild_id, why),
        },
        other => debug!("[Voice {}] Ignoring op {:?}", guild_id, other),
    }
}

/// Reads datagrams: keepalive echoes are recorded, voice packets decrypted and queued.
async fn receive_audio(
    inner: Arc<CallInner>,
    transport: Arc<Transport>,
    stop: CancellationToken,
    failures: mpsc::Sender<Error>,
    ready: oneshot::Sender<()>,
) {
    let guild_id = inner.guild_id;
    let inbound = inner.inbound();
    let mut buf = [0; VOICE_PACKET_MAX];
    let mut dropping = false;

    let _ = ready.send(());

    loop {
        let len = tokio::select! {
            () = stop.cancelled() => return,
            received = transport.udp.recv(&mut buf) => match received {
                Ok(len) => len,
                Err(why) => {
                    report(&failures, why.into());
                    return;
                },
            },
        };

        if len == UDP_KEEPALIVE_LEN {
            inner.udp_heartbeat.record_ack();
            continue;
        }

        let packet = match rtp::decrypt_packet(&transport.cipher, &buf[..len]) {
            Ok(packet) => packet,
            Err(why) => {
                trace!("[Voice {}] Discarding datagram: {}", guild_id, why);
                continue;
            },
        };

        let Some(inbound) = &inbound else { continue };

        match inbound.try_send(packet) {
            Ok(()) => dropping = false,
            Err(_) if !dropping => {
                warn!("[Voice {}] Receive queue full, dropping audio", guild_id);
                dropping = true;
            },
            Err(_) => {},
        }
    }
}

/// Sends one queued Opus frame every 20ms; ticks without a frame are skipped.
///
/// Nothing is sent before `primed` fires, so the silent frame of a fresh session goes out alone.
async fn send_audio(
    inner: Arc<CallInner>,
    transport: Arc<Transport>,
    stop: CancellationToken,
    failures: mpsc::Sender<Error>,
    ready: oneshot::Sender<()>,
    primed: oneshot::Receiver<()>,
) {
    let _ = ready.send(());

    tokio::select! {
        () = stop.cancelled() => return,
        result = primed => {
            if result.is_err() {
                return;
            }
        },
    }

    let mut ticker = interval(FRAME_LEN);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = stop.cancelled() => return,
            _ = ticker.tick() => {},
        }

        let Ok(opus) = inner.outbound.try_recv() else { continue };

        if let Err(why) = transport.send_opus(&opus).await {
            report(&failures, why);
            return;
        }
    }
}

/// Sends one silent frame wrapped in speaking indicators, after which Discord starts sending
/// audio to the bot.
async fn prime(inner: &CallInner, transport: &Transport) -> Result<()> {
    inner.set_speaking(true).await?;
    transport.send_opus(&SILENT_FRAME).await?;
    inner.set_speaking(false).await
}

/// Starts the tasks of a handshaken connection and marks the call connected.
pub(super) async fn establish(
    inner: &Arc<CallInner>,
    connection: Connection,
) -> Result<(Running, Failures)> {
    let (failures, failed) = mpsc::channel(4);
    let fresh = connection.fresh;
    let transport = Arc::clone(&connection.transport);

    let (running, started, primed) = Running::start(inner, connection, &failures);
    drop(failures);

    for signal in started {
        if signal.await.is_err() {
            running.stop(inner, close_codes::UNKNOWN_ERROR).await;
            return Err(VoiceError::NotConnected.into());
        }
    }

    if fresh {
        inner.reset_speaking().await;

        if let Err(why) = prime(inner, &transport).await {
            running.stop(inner, close_codes::UNKNOWN_ERROR).await;
            return Err(why);
        }
    }

    let _ = primed.send(());

    if !inner.set_stage(VoiceStage::Connected) {
        running.stop(inner, close_codes::NORMAL).await;
        return Err(VoiceError::NotConnected.into());
    }

    Ok((running, failed))
}

/// Why a running connection has to be replaced.
enum Failure {
    Error(Error),
    /// Discord moved the call to another voice server.
    Moved,
}

fn permanent(why: &Error) -> Option<&VoiceError> {
    match why {
        Error::Voice(voice) if voice.is_permanent() => Some(voice),
        _ => None,
    }
}

async fn give_up(inner: &CallInner, why: VoiceError) {
    error!("[Voice {}] Disconnected for good: {}", inner.guild_id, why);

    inner.set_stage(VoiceStage::Disconnected);
    inner.report_error(&Error::from(why.clone()));
    inner.emit_reliably(VoiceEvent::Disconnected(why)).await;
}

/// Keeps a call connected until it is closed or refused for good.
///
/// A failed connection is resumed on the same session; a failover to another server, or a
/// rejected resume, falls back to a fresh identify.
pub(super) async fn supervise(inner: Arc<CallInner>, running: Running, failed: Failures) {
    let guild_id = inner.guild_id;
    let mut running = running;
    let mut failed = failed;

    loop {
        let failure = tokio::select! {
            biased;
            () = inner.closing.cancelled() => None,
            () = inner.failover.notified() => Some(Failure::Moved),
            why = failed.recv() => {
                Some(Failure::Error(why.unwrap_or_else(|| VoiceError::Closed(None).into())))
            },
        };

        let Some(failure) = failure else {
            running.stop(&inner, close_codes::NORMAL).await;
            return;
        };

        running.stop(&inner, close_codes::UNKNOWN_ERROR).await;

        let resume = match failure {
            Failure::Moved => false,
            Failure::Error(why) => {
                if let Some(voice) = permanent(&why) {
                    give_up(&inner, voice.clone()).await;
                    return;
                }

                warn!("[Voice {}] Connection lost: {}", guild_id, why);
                inner.report_error(&why);
                true
            },
        };

        (running, failed) = match reconnect(&inner, resume).await {
            Some(connected) => connected,
            None => return,
        };
    }
}

/// Reconnects with a fixed delay until it succeeds, is refused for good or the call closes.
async fn reconnect(inner: &Arc<CallInner>, resume: bool) -> Option<(Running, Failures)> {
    let guild_id = inner.guild_id;
    let mut resume = resume;

    loop {
        if !inner.set_stage(VoiceStage::Reconnecting) {
            return None;
        }

        let delay = inner.config.reconnect_delay;
        info!("[Voice {}] Reconnecting in {:?}", guild_id, delay);

        tokio::select! {
            biased;
            () = inner.closing.cancelled() => return None,
            () = sleep(delay) => {},
        }

        let Some(info) = inner.info() else {
            give_up(inner, VoiceError::NotConnected).await;
            return None;
        };
        let transport = if resume { inner.transport.read().clone() } else { None };

        let attempt = async {
            let connection = match transport {
                Some(transport) => inner.resume(&info, transport).await?,
                None => inner.identify(&info).await?,
            };

            establish(inner, connection).await
        };

        let result = tokio::select! {
            biased;
            () = inner.closing.cancelled() => return None,
            result = attempt => result,
        };

        match result {
            Ok(connected) => {
                info!("[Voice {}] Reconnected to {}", guild_id, info.endpoint);
                return Some(connected);
            },
            Err(why) => {
                if let Some(voice) = permanent(&why) {
                    give_up(inner, voice.clone()).await;
                    return None;
                }

                warn!("[Voice {}] Reconnect failed: {}", guild_id, why);
                resume = false;
            },
        }
    }
}
