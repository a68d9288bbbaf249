//! RTP framing and `xsalsa20_poly1305` encryption of voice packets.
//!
//! A voice packet is a 12-byte RTP header followed by the encrypted Opus frame. The nonce is the
//! header itself, padded with zeros to 24 bytes, and the Poly1305 tag precedes the ciphertext.

use byteorder::{BigEndian, ByteOrder};
use xsalsa20poly1305::aead::{AeadInPlace, KeyInit};
use xsalsa20poly1305::{Nonce, Tag, XSalsa20Poly1305 as Cipher};

use super::constants::{
    MONO_FRAME_SIZE,
    NONCE_SIZE,
    RTP_HEADER_LEN,
    RTP_PROFILE_TYPE,
    RTP_VERSION,
    RTP_VERSION_EXTENSION,
    TAG_SIZE,
};
use super::VoiceError;

/// Creates the cipher for a session's secret key.
///
/// # Errors
///
/// Returns [`VoiceError::InvalidSecretKey`] if the key is not 32 bytes long.
pub fn cipher(key: &[u8]) -> Result<Cipher, VoiceError> {
    Cipher::new_from_slice(key).map_err(|_| VoiceError::InvalidSecretKey)
}

/// The varying fields of the RTP header of an outgoing stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RtpHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Starts a stream for `ssrc` at random sequence and timestamp values.
    #[must_use]
    pub fn new(ssrc: u32) -> Self {
        Self {
            sequence: rand::random(),
            timestamp: rand::random(),
            ssrc,
        }
    }

    /// Moves on to the next 20ms frame. Both counters wrap.
    pub fn advance(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(MONO_FRAME_SIZE as u32);
    }

    fn write(&self, buf: &mut [u8]) {
        buf[0] = RTP_VERSION;
        buf[1] = RTP_PROFILE_TYPE;
        BigEndian::write_u16(&mut buf[2..4], self.sequence);
        BigEndian::write_u32(&mut buf[4..8], self.timestamp);
        BigEndian::write_u32(&mut buf[8..12], self.ssrc);
    }
}

/// A decrypted voice packet received from another user.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AudioPacket {
    /// The first header byte: the RTP version and flags, `0x90` when an extension was present.
    pub kind: u8,
    /// The second header byte: the payload type.
    pub version: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// The Opus frame.
    pub opus: Vec<u8>,
}

fn nonce(header: &[u8]) -> Nonce {
    let mut nonce = Nonce::default();
    nonce[..RTP_HEADER_LEN].copy_from_slice(&header[..RTP_HEADER_LEN]);
    debug_assert_eq!(nonce.len(), NONCE_SIZE);
    nonce
}

/// Builds the encrypted packet carrying `opus` under `header`.
///
/// # Errors
///
/// Returns [`VoiceError::Crypto`] if encryption fails.
pub fn encrypt_packet(
    cipher: &Cipher,
    header: &RtpHeader,
    opus: &[u8],
) -> Result<Vec<u8>, VoiceError> {
    let mut packet = vec![0; RTP_HEADER_LEN + TAG_SIZE + opus.len()];
    header.write(&mut packet[..RTP_HEADER_LEN]);

    let nonce = nonce(&packet);
    let (tag_bytes, body) = packet[RTP_HEADER_LEN..].split_at_mut(TAG_SIZE);
    body.copy_from_slice(opus);

    let tag = cipher.encrypt_in_place_detached(&nonce, b"", body)?;
    tag_bytes.copy_from_slice(&tag);

    Ok(packet)
}

/// Authenticates and decrypts a received packet.
///
/// # Errors
///
/// Returns [`VoiceError::IllegalVoicePacket`] if the datagram is not an RTP voice packet, and
/// [`VoiceError::Crypto`] if it fails authentication.
pub fn decrypt_packet(cipher: &Cipher, packet: &[u8]) -> Result<AudioPacket, VoiceError> {
    if packet.len() < RTP_HEADER_LEN + TAG_SIZE {
        return Err(VoiceError::IllegalVoicePacket);
    }

    let extension = match packet[0] {
        RTP_VERSION => false,
        RTP_VERSION_EXTENSION => true,
        _ => return Err(VoiceError::IllegalVoicePacket),
    };

    let (header, rest) = packet.split_at(RTP_HEADER_LEN);
    let (tag, body) = rest.split_at(TAG_SIZE);

    let mut opus = body.to_vec();
    cipher.decrypt_in_place_detached(&nonce(header), b"", &mut opus, Tag::from_slice(tag))?;

    if extension {
        // Profile (2 bytes), length in 32-bit words (2 bytes), then the elements.
        if opus.len() < 4 {
            return Err(VoiceError::IllegalVoicePacket);
        }

        let skip = 4 + 4 * usize::from(BigEndian::read_u16(&opus[2..4]));
        if opus.len() < skip {
            return Err(VoiceError::IllegalVoicePacket);
        }

        opus.drain(..skip);
    }

    Ok(AudioPacket {
        kind: header[0],
        version: header[1],
        sequence: BigEndian::read_u16(&header[2..4]),
        timestamp: BigEndian::read_u32(&header[4..8]),
        ssrc: BigEndian::read_u32(&header[8..12]),
        opus,
    })
}
