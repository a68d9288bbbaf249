//! The voice handshake: websocket identify or resume, IP discovery and key exchange.

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::{DeserializeOwned, IgnoredAny};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info};
use url::Url;
use xsalsa20poly1305::XSalsa20Poly1305 as Cipher;

use super::call::{CallInner, VoiceStage};
use super::constants::{CRYPTO_MODE, HEARTBEAT_INTERVAL_SCALE, VOICE_GATEWAY_VERSION};
use super::discovery;
use super::info::ConnectionInfo;
use super::payload::{Hello, Identify, ProtocolData, Ready, Resume, SelectProtocol, SessionDescription};
use super::rtp::{self, RtpHeader};
use super::{CloseCode, VoiceError, VoiceOpcode};
use crate::internal::prelude::*;
use crate::ws::{self, close_code, Compression, Frame, WsReader, WsWriter};

/// The UDP side of a session: the socket, the SSRC and the key to encrypt with.
pub(super) struct Transport {
    pub udp: UdpSocket,
    pub ssrc: u32,
    pub cipher: Cipher,
    rtp: Mutex<RtpHeader>,
}

impl Transport {
    fn new(udp: UdpSocket, ssrc: u32, cipher: Cipher) -> Self {
        Self {
            udp,
            ssrc,
            cipher,
            rtp: Mutex::new(RtpHeader::new(ssrc)),
        }
    }

    /// Encrypts one Opus frame under the next RTP header and sends it.
    pub async fn send_opus(&self, opus: &[u8]) -> Result<()> {
        let packet = {
            let mut header = self.rtp.lock();
            let packet = rtp::encrypt_packet(&self.cipher, &header, opus)?;
            header.advance();
            packet
        };

        self.udp.send(&packet).await?;
        Ok(())
    }
}

/// A handshaken voice connection, ready for its tasks to be started.
pub(super) struct Connection {
    pub reader: WsReader,
    pub writer: Arc<WsWriter>,
    pub interval: Duration,
    pub transport: Arc<Transport>,
    /// Whether a new key was negotiated, as opposed to a resumed session.
    pub fresh: bool,
}

impl CallInner {
    async fn step<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.config.handshake_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(VoiceError::HandshakeTimeout.into()),
        }
    }

    /// Opens the websocket and waits for Hello.
    async fn open(&self, info: &ConnectionInfo) -> Result<(WsReader, Arc<WsWriter>, Duration)> {
        let url = endpoint_url(&info.endpoint)?;
        debug!("[Voice {}] Connecting to {}", self.guild_id, url);

        self.set_stage(VoiceStage::WsConnecting);
        let (mut reader, writer) = self.step(ws::connect(&url, Compression::Payload)).await?;
        let hello: Hello = self.step(expect(&mut reader, VoiceOpcode::Hello)).await?;

        Ok((reader, Arc::new(writer), heartbeat_interval(hello)?))
    }

    /// Performs a full handshake, negotiating a new SSRC and key.
    #[cfg_attr(feature = "tracing_instrument", tracing::instrument(skip(self)))]
    pub(super) async fn identify(&self, info: &ConnectionInfo) -> Result<Connection> {
        let (mut reader, writer, interval) = self.open(info).await?;

        self.set_stage(VoiceStage::Identifying);
        writer
            .send_json(VoiceOpcode::Identify, &Identify {
                server_id: info.guild_id,
                user_id: info.user_id,
                session_id: &info.session_id,
                token: &info.token,
            })
            .await?;

        let ready: Ready = self.step(expect(&mut reader, VoiceOpcode::Ready)).await?;
        if !ready.modes.iter().any(|mode| mode == CRYPTO_MODE) {
            return Err(VoiceError::CryptoModeUnavailable.into());
        }

        self.set_stage(VoiceStage::UdpDiscovery);
        let bind: SocketAddr = if ready.ip.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let udp = UdpSocket::bind(bind).await?;
        udp.connect((ready.ip, ready.port)).await?;

        let (address, port) = self.step(discovery::discover(&udp, ready.ssrc)).await?;

        self.set_stage(VoiceStage::SelectProtocol);
        writer
            .send_json(VoiceOpcode::SelectProtocol, &SelectProtocol {
                protocol: "udp",
                data: ProtocolData {
                    address,
                    port,
                    mode: CRYPTO_MODE,
                },
            })
            .await?;

        self.set_stage(VoiceStage::SessionDescription);
        let description: SessionDescription =
            self.step(expect(&mut reader, VoiceOpcode::SessionDescription)).await?;
        if description.mode != CRYPTO_MODE {
            return Err(VoiceError::CryptoModeUnavailable.into());
        }

        let cipher = rtp::cipher(&description.secret_key)?;
        let transport = Arc::new(Transport::new(udp, ready.ssrc, cipher));
        *self.transport.write() = Some(Arc::clone(&transport));

        info!("[Voice {}] Identified with SSRC {}", self.guild_id, ready.ssrc);

        Ok(Connection {
            reader,
            writer,
            interval,
            transport,
            fresh: true,
        })
    }

    /// Re-attaches to the session of `transport` on a new websocket.
    #[cfg_attr(feature = "tracing_instrument", tracing::instrument(skip(self, transport)))]
    pub(super) async fn resume(
        &self,
        info: &ConnectionInfo,
        transport: Arc<Transport>,
    ) -> Result<Connection> {
        let (mut reader, writer, interval) = self.open(info).await?;

        self.set_stage(VoiceStage::Resuming);
        writer
            .send_json(VoiceOpcode::Resume, &Resume {
                server_id: info.guild_id,
                session_id: &info.session_id,
                token: &info.token,
            })
            .await?;

        let _: IgnoredAny = self.step(expect(&mut reader, VoiceOpcode::Resumed)).await?;

        info!("[Voice {}] Resumed", self.guild_id);

        Ok(Connection {
            reader,
            writer,
            interval,
            transport,
            fresh: false,
        })
    }
}

/// Reads until the payload with opcode `wanted` arrives, skipping asynchronous notifications.
async fn expect<T>(reader: &mut WsReader, wanted: VoiceOpcode) -> Result<T>
where
    T: DeserializeOwned,
{
    loop {
        let payload = match reader.recv().await? {
            Frame::Payload(payload) => payload,
            Frame::Close(frame) => {
                let code = close_code(frame.as_ref()).map(CloseCode::from);
                return Err(VoiceError::Closed(code).into());
            },
        };

        match VoiceOpcode::from(payload.op) {
            op if op == wanted => return payload.data(),
            VoiceOpcode::Hello
            | VoiceOpcode::HeartbeatAck
            | VoiceOpcode::Speaking
            | VoiceOpcode::ClientDisconnect
            | VoiceOpcode::Unknown(_) => {
                debug!("Skipping op {} while waiting for {:?}", payload.op, wanted);
            },
            other => {
                debug!("Expected {:?}; got: {:?}", wanted, other);
                return Err(VoiceError::ExpectedHandshake.into());
            },
        }
    }
}

fn heartbeat_interval(hello: Hello) -> Result<Duration> {
    let millis = hello.heartbeat_interval * HEARTBEAT_INTERVAL_SCALE;
    if !millis.is_finite() || millis <= 0.0 {
        return Err(VoiceError::ExpectedHandshake.into());
    }

    Duration::try_from_secs_f64(millis / 1000.0).map_err(|_| VoiceError::ExpectedHandshake.into())
}

/// The websocket URL for a voice server endpoint.
///
/// Discord hands out a bare `host:port`, which is dialled over TLS; an endpoint which already has
/// a scheme is used as is.
fn endpoint_url(endpoint: &str) -> Result<Url, VoiceError> {
    let endpoint = endpoint.strip_suffix(":80").unwrap_or(endpoint);

    let mut url = if endpoint.contains("://") {
        Url::parse(endpoint)
    } else {
        Url::parse(&format!("wss://{endpoint}"))
    }
    .map_err(|_| VoiceError::EndpointUrl)?;

    url.query_pairs_mut().append_pair("v", &VOICE_GATEWAY_VERSION.to_string());
    Ok(url)
}
