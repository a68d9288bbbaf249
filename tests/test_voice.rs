use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use sonority::async_trait;
use sonority::gateway::VoiceGatewayManager;
use sonority::model::gateway::ShardInfo;
use sonority::model::id::{ChannelId, GuildId, UserId};
use sonority::model::voice::VoiceState;
use sonority::voice::constants::{IP_DISCOVERY_LEN, SILENT_FRAME};
use sonority::voice::rtp::{self, RtpHeader};
use sonority::voice::{
    Call,
    CloseCode,
    Config,
    Manager,
    VoiceError,
    VoiceEvent,
    VoiceStage,
    VoiceUpdate,
};
use sonority::{json, Result};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use xsalsa20poly1305::XSalsa20Poly1305;

const GUILD: GuildId = GuildId::new(1);
const CHANNEL: ChannelId = ChannelId::new(2);
const USER: UserId = UserId::new(3);
const KEY: [u8; 32] = [9; 32];
const WAIT: Duration = Duration::from_secs(5);

type Ws = WebSocketStream<TcpStream>;

struct Gateway(mpsc::UnboundedSender<Option<ChannelId>>);

#[async_trait]
impl VoiceUpdate for Gateway {
    async fn update_voice_state(
        &self,
        _: GuildId,
        channel_id: Option<ChannelId>,
        _: bool,
        _: bool,
    ) -> Result<()> {
        let _ = self.0.send(channel_id);
        Ok(())
    }
}

/// A voice server: a websocket for signaling and a UDP socket for media.
struct VoiceServer {
    listener: TcpListener,
    udp: UdpSocket,
}

impl VoiceServer {
    async fn new() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
            udp: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    fn endpoint(&self) -> String {
        format!("ws://{}", self.listener.local_addr().unwrap())
    }

    async fn accept(&self) -> Ws {
        let (stream, _) = timeout(WAIT, self.listener.accept()).await.unwrap().unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        send(&mut ws, json::json!({"op": 8, "d": {"heartbeat_interval": 60000.0}})).await;
        ws
    }

    async fn recv_udp(&self) -> (Vec<u8>, SocketAddr) {
        let mut buf = [0; 2048];
        let (len, peer) = timeout(WAIT, self.udp.recv_from(&mut buf)).await.unwrap().unwrap();
        (buf[..len].to_vec(), peer)
    }
}

/// One handshaken connection as seen by the server.
struct Session {
    ws: Ws,
    cipher: XSalsa20Poly1305,
    peer: SocketAddr,
    /// The RTP sequence of the silent frame which completed the handshake.
    sequence: u16,
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// The next payload from the client, heartbeats aside.
async fn recv(ws: &mut Ws) -> Value {
    loop {
        let message = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();

        if let Message::Text(text) = message {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["op"] != 3 {
                return value;
            }
        }
    }
}

/// Plays the server side of a full handshake, up to the silent frame.
async fn handshake(server: &VoiceServer, ssrc: u32, token: &str) -> Session {
    let mut ws = server.accept().await;

    let identify = recv(&mut ws).await;
    assert_eq!(identify["op"], 0);
    assert_eq!(identify["d"]["server_id"], "1");
    assert_eq!(identify["d"]["user_id"], "3");
    assert_eq!(identify["d"]["session_id"], "abc");
    assert_eq!(identify["d"]["token"], token);

    let udp_port = server.udp.local_addr().unwrap().port();
    send(&mut ws, json::json!({
        "op": 2,
        "d": {"ssrc": ssrc, "ip": "127.0.0.1", "port": udp_port, "modes": ["xsalsa20_poly1305"]},
    }))
    .await;

    let (discovery, peer) = server.recv_udp().await;
    assert_eq!(discovery.len(), IP_DISCOVERY_LEN);
    assert_eq!(BigEndian::read_u32(&discovery[..4]), ssrc);

    let mut response = [0; IP_DISCOVERY_LEN];
    response[4..13].copy_from_slice(b"127.0.0.1");
    LittleEndian::write_u16(&mut response[IP_DISCOVERY_LEN - 2..], peer.port());
    server.udp.send_to(&response, peer).await.unwrap();

    let select = recv(&mut ws).await;
    assert_eq!(select["op"], 1);
    assert_eq!(select["d"]["protocol"], "udp");
    assert_eq!(select["d"]["data"]["address"], "127.0.0.1");
    assert_eq!(select["d"]["data"]["port"], peer.port());
    assert_eq!(select["d"]["data"]["mode"], "xsalsa20_poly1305");

    send(&mut ws, json::json!({
        "op": 4,
        "d": {"mode": "xsalsa20_poly1305", "secret_key": KEY.to_vec()},
    }))
    .await;

    let cipher = rtp::cipher(&KEY).unwrap();

    let speaking = recv(&mut ws).await;
    assert_eq!(speaking["op"], 5);
    assert_eq!(speaking["d"]["speaking"], 1);
    assert_eq!(speaking["d"]["ssrc"], ssrc);

    let (packet, _) = server.recv_udp().await;
    let silence = rtp::decrypt_packet(&cipher, &packet).unwrap();
    assert_eq!(silence.opus, SILENT_FRAME);
    assert_eq!(silence.ssrc, ssrc);

    let silent = recv(&mut ws).await;
    assert_eq!(silent["op"], 5);
    assert_eq!(silent["d"]["speaking"], 0);

    Session {
        ws,
        cipher,
        peer,
        sequence: silence.sequence,
    }
}

fn config() -> Config {
    Config::default()
        .reconnect_delay(Duration::from_millis(50))
        .udp_keepalive(Duration::from_secs(60))
}

async fn manager() -> (Arc<Manager>, mpsc::UnboundedReceiver<Option<ChannelId>>) {
    manager_with(config()).await
}

async fn manager_with(
    config: Config,
) -> (Arc<Manager>, mpsc::UnboundedReceiver<Option<ChannelId>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = Manager::new(Gateway(tx), config);
    manager.initialise(ShardInfo::new(0, 1), USER).await;
    (Arc::new(manager), rx)
}

fn voice_state(channel_id: Option<u64>) -> VoiceState {
    let channel_id = channel_id.map_or_else(|| "null".to_owned(), |id| format!("\"{id}\""));
    json::from_str(&format!(
        r#"{{"guild_id":"1","channel_id":{channel_id},"user_id":"3","session_id":"abc"}}"#
    ))
    .unwrap()
}

/// Starts a join and feeds it the gateway events pointing at `server`.
async fn join(
    manager: &Arc<Manager>,
    updates: &mut mpsc::UnboundedReceiver<Option<ChannelId>>,
    server: &VoiceServer,
) -> JoinHandle<Result<Call>> {
    let joining = {
        let manager = Arc::clone(manager);
        tokio::spawn(async move { manager.join(GUILD, CHANNEL).await })
    };

    assert_eq!(updates.recv().await, Some(Some(CHANNEL)));

    // The two halves may arrive in either order.
    manager.server_update(GUILD, Some(&server.endpoint()), "tok").await;
    manager.state_update(GUILD, &voice_state(Some(2))).await;

    joining
}

async fn wait_for_stage(call: &Call, stage: VoiceStage) {
    timeout(WAIT, async {
        while call.stage() != stage {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn joins_and_exchanges_audio() {
    let server = VoiceServer::new().await;
    let (manager, mut updates) = manager().await;

    let joining = join(&manager, &mut updates, &server).await;
    let mut session = handshake(&server, 7, "tok").await;
    let call = joining.await.unwrap().unwrap();

    assert_eq!(call.stage(), VoiceStage::Connected);
    assert_eq!(call.ssrc(), Some(7));
    assert_eq!(call.channel_id(), Some(CHANNEL));
    assert!(manager.get(GUILD).is_some());

    // Incoming audio from another user.
    let header = RtpHeader {
        sequence: 5,
        timestamp: 960,
        ssrc: 99,
    };
    let packet = rtp::encrypt_packet(&session.cipher, &header, b"hello").unwrap();
    server.udp.send_to(&packet, session.peer).await.unwrap();

    let received = timeout(WAIT, call.receiver().recv_async()).await.unwrap().unwrap();
    assert_eq!(received.opus, b"hello");
    assert_eq!(received.ssrc, 99);
    assert_eq!(received.sequence, 5);
    assert_eq!((received.kind, received.version), (0x80, 0x78));

    // Outgoing audio continues the RTP stream of the silent frame.
    call.send_audio(vec![1, 2, 3]).await.unwrap();
    let (packet, _) = server.recv_udp().await;
    let sent = rtp::decrypt_packet(&session.cipher, &packet).unwrap();
    assert_eq!(sent.opus, [1, 2, 3]);
    assert_eq!(sent.ssrc, 7);
    assert_eq!(sent.sequence, session.sequence.wrapping_add(1));

    // Speaking updates of other users surface as events.
    send(&mut session.ws, json::json!({
        "op": 5,
        "d": {"user_id": "55", "ssrc": 99, "speaking": 1},
    }))
    .await;
    let event = timeout(WAIT, call.events().recv_async()).await.unwrap().unwrap();
    assert!(matches!(
        event,
        VoiceEvent::Speaking { user_id: Some(user), ssrc: 99, speaking: true } if user == UserId::new(55)
    ));

    // Speaking is a no-op when unchanged, and sent otherwise.
    call.speaking(false).await.unwrap();
    call.speaking(true).await.unwrap();
    let speaking = recv(&mut session.ws).await;
    assert_eq!(speaking["op"], 5);
    assert_eq!(speaking["d"]["speaking"], 1);

    manager.leave(GUILD).await.unwrap();
    assert_eq!(updates.recv().await, Some(None));
    assert!(call.is_closed());
    assert!(manager.get(GUILD).is_none());

    let close = loop {
        match timeout(WAIT, session.ws.next()).await.unwrap() {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected a close frame, got {other:?}"),
        }
    };
    assert_eq!(close.map(|frame| u16::from(frame.code)), Some(1000));
}

#[tokio::test]
async fn resumes_after_abrupt_close() {
    let server = VoiceServer::new().await;
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    let config = config().on_error(move |why| {
        let _ = errors.send(why.to_string());
    });
    let (manager, mut updates) = manager_with(config).await;

    let joining = join(&manager, &mut updates, &server).await;
    let session = handshake(&server, 7, "tok").await;
    let call = joining.await.unwrap().unwrap();

    // Drop the websocket without a close frame.
    drop(session.ws);

    let mut ws = server.accept().await;
    let resume = recv(&mut ws).await;
    assert_eq!(resume["op"], 7);
    assert_eq!(resume["d"]["server_id"], "1");
    assert_eq!(resume["d"]["session_id"], "abc");
    assert_eq!(resume["d"]["token"], "tok");
    send(&mut ws, json::json!({"op": 9, "d": null})).await;

    wait_for_stage(&call, VoiceStage::Connected).await;
    assert_eq!(call.ssrc(), Some(7));

    // The error which caused the reconnect is reported exactly once.
    assert!(error_rx.try_recv().is_ok());
    assert!(error_rx.try_recv().is_err());

    // The UDP session and key survive the resume.
    call.send_audio(vec![4, 5, 6]).await.unwrap();
    let (packet, _) = server.recv_udp().await;
    let sent = rtp::decrypt_packet(&session.cipher, &packet).unwrap();
    assert_eq!(sent.opus, [4, 5, 6]);

    call.close().await;
    assert_eq!(updates.recv().await, Some(None));
}

#[tokio::test]
async fn unanswered_keepalives_resume_the_session() {
    let server = VoiceServer::new().await;
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    let config = config().udp_keepalive(Duration::from_millis(100)).on_error(move |why| {
        let _ = errors.send(matches!(why, sonority::Error::Voice(VoiceError::HeartbeatStale)));
    });
    let (manager, mut updates) = manager_with(config).await;

    let joining = join(&manager, &mut updates, &server).await;
    let _session = handshake(&server, 7, "tok").await;
    let call = joining.await.unwrap().unwrap();

    // Keepalives are never echoed, so the connection goes stale.
    assert_eq!(timeout(WAIT, error_rx.recv()).await.unwrap(), Some(true));

    let mut ws = server.accept().await;
    let resume = recv(&mut ws).await;
    assert_eq!(resume["op"], 7);
    assert_eq!(resume["d"]["session_id"], "abc");

    call.close().await;
}

#[tokio::test]
async fn server_failover_identifies_again() {
    let first = VoiceServer::new().await;
    let second = VoiceServer::new().await;
    let (manager, mut updates) = manager().await;

    let joining = join(&manager, &mut updates, &first).await;
    let _session = handshake(&first, 7, "tok").await;
    let call = joining.await.unwrap().unwrap();

    manager.server_update(GUILD, Some(&second.endpoint()), "tok2").await;

    let _moved = handshake(&second, 8, "tok2").await;
    wait_for_stage(&call, VoiceStage::Connected).await;
    assert_eq!(call.ssrc(), Some(8));

    manager.leave_all().await;
    assert!(call.is_closed());
}

#[tokio::test]
async fn queued_audio_waits_for_the_silent_frame() {
    let first = VoiceServer::new().await;
    let second = VoiceServer::new().await;
    let (manager, mut updates) =
        manager_with(config().reconnect_delay(Duration::from_millis(500))).await;

    let joining = join(&manager, &mut updates, &first).await;
    let _session = handshake(&first, 7, "tok").await;
    let call = joining.await.unwrap().unwrap();

    manager.server_update(GUILD, Some(&second.endpoint()), "tok2").await;
    wait_for_stage(&call, VoiceStage::Reconnecting).await;

    // Queued while no sender runs; none of it may overtake the silent frame.
    let audio = call.audio_sender();
    for frame in 1..=3u8 {
        audio.send(vec![frame; 3]).unwrap();
    }

    let moved = handshake(&second, 8, "tok2").await;
    wait_for_stage(&call, VoiceStage::Connected).await;

    for (frame, offset) in (1..=3u8).zip(1u16..) {
        let (packet, _) = second.recv_udp().await;
        let sent = rtp::decrypt_packet(&moved.cipher, &packet).unwrap();
        assert_eq!(sent.opus, [frame; 3]);
        assert_eq!(sent.sequence, moved.sequence.wrapping_add(offset));
    }

    manager.leave_all().await;
}

#[tokio::test]
async fn permanent_close_ends_the_call() {
    let server = VoiceServer::new().await;
    let (errors, mut error_rx) = mpsc::unbounded_channel();
    let config = config().on_error(move |why| {
        let _ = errors.send(why.to_string());
    });
    let (manager, mut updates) = manager_with(config).await;

    let joining = join(&manager, &mut updates, &server).await;
    let mut session = handshake(&server, 7, "tok").await;
    let call = joining.await.unwrap().unwrap();
    let events = call.events();

    session
        .ws
        .send(Message::Close(Some(CloseFrame {
            code: WsCloseCode::from(4006),
            reason: "Session is no longer valid.".into(),
        })))
        .await
        .unwrap();

    let event = timeout(WAIT, events.recv_async()).await.unwrap().unwrap();
    assert!(matches!(
        event,
        VoiceEvent::Disconnected(VoiceError::Closed(Some(CloseCode::SessionInvalid)))
    ));
    wait_for_stage(&call, VoiceStage::Disconnected).await;

    // No reconnect may follow.
    assert!(timeout(Duration::from_millis(300), server.listener.accept()).await.is_err());
    assert!(error_rx.try_recv().is_ok());
    assert!(error_rx.try_recv().is_err());
}

#[tokio::test]
async fn removal_from_the_channel_closes_the_call() {
    let server = VoiceServer::new().await;
    let (manager, mut updates) = manager().await;

    let joining = join(&manager, &mut updates, &server).await;
    let _session = handshake(&server, 7, "tok").await;
    let call = joining.await.unwrap().unwrap();

    manager.state_update(GUILD, &voice_state(None)).await;

    wait_for_stage(&call, VoiceStage::Closed).await;
    assert!(manager.get(GUILD).is_none());
    assert!(matches!(
        call.send_audio(vec![1]).await,
        Err(sonority::Error::Voice(VoiceError::NotConnected))
    ));
}
