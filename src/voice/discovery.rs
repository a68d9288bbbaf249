//! UDP IP discovery, which tells the client the address Discord sees it at.
//!
//! The request is a 70-byte datagram holding the big-endian SSRC in its first four bytes. The
//! response echoes the size: the external address as null-terminated ASCII starting at byte 4,
//! and the external port as a little-endian `u16` in the last two bytes.

use std::net::IpAddr;
use std::str;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tokio::net::UdpSocket;
use tracing::debug;

use super::constants::IP_DISCOVERY_LEN;
use super::VoiceError;
use crate::internal::prelude::*;

const ADDRESS_OFFSET: usize = 4;
const PORT_OFFSET: usize = IP_DISCOVERY_LEN - 2;

/// Builds the discovery request for `ssrc`.
#[must_use]
pub fn request(ssrc: u32) -> [u8; IP_DISCOVERY_LEN] {
    let mut bytes = [0; IP_DISCOVERY_LEN];
    BigEndian::write_u32(&mut bytes[..ADDRESS_OFFSET], ssrc);
    bytes
}

/// Reads the external address and port out of a discovery response.
///
/// # Errors
///
/// Returns [`VoiceError::IllegalDiscoveryResponse`] if the response is too short, and
/// [`VoiceError::IllegalIp`] if the address is not a null-terminated IP address.
pub fn parse_response(bytes: &[u8]) -> Result<(IpAddr, u16), VoiceError> {
    if bytes.len() < IP_DISCOVERY_LEN {
        return Err(VoiceError::IllegalDiscoveryResponse);
    }

    let address = &bytes[ADDRESS_OFFSET..PORT_OFFSET];
    let nul_byte_index = address.iter().position(|&b| b == 0).ok_or(VoiceError::IllegalIp)?;

    let address = str::from_utf8(&address[..nul_byte_index])
        .ok()
        .and_then(|address| address.parse().ok())
        .ok_or(VoiceError::IllegalIp)?;
    let port = LittleEndian::read_u16(&bytes[PORT_OFFSET..IP_DISCOVERY_LEN]);

    Ok((address, port))
}

/// Performs the discovery round trip on a connected socket.
pub(crate) async fn discover(udp: &UdpSocket, ssrc: u32) -> Result<(IpAddr, u16)> {
    udp.send(&request(ssrc)).await?;

    let mut bytes = [0; IP_DISCOVERY_LEN];
    let len = udp.recv(&mut bytes).await?;
    let (address, port) = parse_response(&bytes[..len])?;

    debug!("Discovered external address {}:{}", address, port);
    Ok((address, port))
}
