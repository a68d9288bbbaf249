//! The websocket transport and payload envelope shared by the gateway and voice connections.
//!
//! Both protocols exchange the same JSON envelope, `{"op": .., "d": .., "s": .., "t": ..}`, so a
//! single codec serves both. Gateway traffic may additionally arrive zlib-compressed, either one
//! message per binary frame or as a `zlib-stream` spanning the whole connection.
//!
//! A connection is split into halves: a [`WsReader`] which is owned by exactly one task at a
//! time, and a [`WsWriter`] which serializes every send behind its own lock and can therefore be
//! shared freely between the heartbeat, dispatcher and user-facing commands.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::ZlibDecoder;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::de::Deserialize;
use serde::ser::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{trace, warn};
use url::Url;

use crate::gateway::GatewayError;
use crate::internal::inflater::Inflater;
use crate::json::{self, RawValue};
use crate::Result;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DECOMPRESSION_MULTIPLIER: usize = 3;

/// How binary frames received on a connection are compressed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Compression {
    /// Every binary frame is a complete zlib document.
    #[default]
    Payload,
    /// Binary frames are slices of one zlib stream which lives as long as the connection.
    Stream,
}

/// The envelope wrapping every message on the gateway and voice websockets.
#[derive(Debug, Deserialize, Serialize)]
pub struct Payload {
    pub op: u8,
    #[serde(default)]
    pub d: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Payload {
    /// Builds an outbound payload carrying `data` as its `d` field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `data` cannot be serialized.
    ///
    /// [`Error::Json`]: crate::Error::Json
    pub fn new<T>(op: impl Into<u8>, data: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self {
            op: op.into(),
            d: Some(json::to_raw(data)?),
            s: None,
            t: None,
        })
    }

    /// Decodes the `d` field, treating a missing field as `null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the field does not match `T`.
    ///
    /// [`Error::Json`]: crate::Error::Json
    pub fn data<'a, T>(&'a self) -> Result<T>
    where
        T: Deserialize<'a>,
    {
        match &self.d {
            Some(raw) => json::from_raw(raw),
            None => json::from_str("null"),
        }
    }

    /// The raw `d` field, as received.
    #[must_use]
    pub fn raw_data(&self) -> &str {
        self.d.as_deref().map_or("null", RawValue::get)
    }

    /// Decodes a payload from its textual JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on malformed input.
    ///
    /// [`Error::Json`]: crate::Error::Json
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        json::from_slice(bytes)
    }

    /// Encodes the payload as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload cannot be serialized.
    ///
    /// [`Error::Json`]: crate::Error::Json
    pub fn encode(&self) -> Result<String> {
        json::to_string(self)
    }
}

/// A complete frame read off a websocket.
#[derive(Debug)]
pub enum Frame {
    Payload(Payload),
    /// The peer closed the connection, or the stream ended without a close frame.
    Close(Option<CloseFrame<'static>>),
}

/// The close code carried by a close frame, if any.
#[must_use]
pub fn close_code(frame: Option<&CloseFrame<'_>>) -> Option<u16> {
    frame.map(|f| u16::from(f.code))
}

/// Opens a websocket connection and splits it into its two halves.
///
/// # Errors
///
/// Returns [`Error::Tungstenite`] if the connection or websocket handshake fails.
///
/// [`Error::Tungstenite`]: crate::Error::Tungstenite
pub async fn connect(url: &Url, compression: Compression) -> Result<(WsReader, WsWriter)> {
    let (stream, _) = connect_async(url.as_str()).await?;
    let (sink, stream) = stream.split();

    let inflater = match compression {
        Compression::Payload => None,
        Compression::Stream => Some(Inflater::new()),
    };

    Ok((
        WsReader {
            stream,
            inflater,
        },
        WsWriter(Mutex::new(sink)),
    ))
}

/// The receiving half of a websocket connection.
pub struct WsReader {
    stream: SplitStream<WsStream>,
    inflater: Option<Inflater>,
}

impl WsReader {
    /// Waits for the next complete payload or close.
    ///
    /// Control frames and partial `zlib-stream` frames are consumed silently.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, failed decompression and malformed JSON.
    pub async fn recv(&mut self) -> Result<Frame> {
        loop {
            let message = match self.stream.next().await {
                Some(message) => message?,
                None => return Ok(Frame::Close(None)),
            };

            match message {
                Message::Text(text) => {
                    trace!("received text frame: {text}");

                    return Payload::decode(text.as_bytes()).map(Frame::Payload).map_err(|why| {
                        warn!("Err deserializing text: {:?}; text: {}", why, text);
                        why
                    });
                },
                Message::Binary(bytes) => {
                    if let Some(payload) = self.inflate(&bytes)? {
                        return Ok(Frame::Payload(payload));
                    }
                },
                Message::Close(frame) => return Ok(Frame::Close(frame)),
                _ => {},
            }
        }
    }

    fn inflate(&mut self, bytes: &[u8]) -> Result<Option<Payload>> {
        let Some(inflater) = self.inflater.as_mut() else {
            return decompress(bytes).map(Some);
        };

        inflater.extend(bytes);

        match inflater.msg() {
            Ok(Some(message)) => Payload::decode(message).map(Some),
            Ok(None) => Ok(None),
            Err(why) => {
                warn!("Err decompressing stream frame: {:?}", why);
                Err(GatewayError::Decompression(why.to_string()).into())
            },
        }
    }
}

/// Inflates and decodes a binary frame that holds a complete zlib document.
fn decompress(bytes: &[u8]) -> Result<Payload> {
    let mut decompressed = Vec::with_capacity(bytes.len() * DECOMPRESSION_MULTIPLIER);

    ZlibDecoder::new(bytes).read_to_end(&mut decompressed).map_err(|why| {
        warn!("Err decompressing bytes: {:?}; bytes: {:?}", why, bytes);
        GatewayError::Decompression(why.to_string())
    })?;

    Payload::decode(&decompressed)
}

/// The sending half of a websocket connection.
pub struct WsWriter(Mutex<SplitSink<WsStream, Message>>);

impl WsWriter {
    /// Sends a payload as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or the socket write fails.
    pub async fn send(&self, payload: &Payload) -> Result<()> {
        let text = payload.encode()?;
        trace!("sending: {text}");

        self.0.lock().await.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Shorthand for building a [`Payload`] and sending it.
    ///
    /// # Errors
    ///
    /// See [`Self::send`].
    pub async fn send_json<T>(&self, op: impl Into<u8>, data: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.send(&Payload::new(op, data)?).await
    }

    /// Sends a close frame and flushes the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the close frame cannot be written.
    pub async fn close(&self, code: u16, reason: &'static str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Borrowed(reason),
        };

        let mut sink = self.0.lock().await;
        sink.send(Message::Close(Some(frame))).await?;
        sink.close().await?;
        Ok(())
    }
}
