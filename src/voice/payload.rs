//! The data carried by voice websocket payloads.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::model::id::{GuildId, UserId};

#[derive(Debug, Serialize)]
pub(crate) struct Identify<'a> {
    pub server_id: GuildId,
    pub user_id: UserId,
    pub session_id: &'a str,
    pub token: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct Resume<'a> {
    pub server_id: GuildId,
    pub session_id: &'a str,
    pub token: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct SelectProtocol<'a> {
    pub protocol: &'a str,
    pub data: ProtocolData<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProtocolData<'a> {
    pub address: IpAddr,
    pub port: u16,
    pub mode: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct Speaking {
    pub speaking: u8,
    pub delay: u32,
    pub ssrc: u32,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub(crate) struct Hello {
    /// In milliseconds, possibly fractional.
    pub heartbeat_interval: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Ready {
    pub ssrc: u32,
    pub ip: IpAddr,
    pub port: u16,
    pub modes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionDescription {
    pub mode: String,
    pub secret_key: Vec<u8>,
}

/// A speaking update of another user in the channel.
#[derive(Debug, Deserialize)]
pub(crate) struct SpeakingUpdate {
    pub user_id: Option<UserId>,
    pub ssrc: u32,
    #[serde(default)]
    pub speaking: u8,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClientDisconnect {
    pub user_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::{self, json};

    #[test]
    fn identify_sends_ids_as_strings() {
        let identify = Identify {
            server_id: GuildId::new(41771983423143937),
            user_id: UserId::new(104694319306248192),
            session_id: "my_session_id",
            token: "my_token",
        };

        assert_eq!(
            json::to_value(&identify).unwrap(),
            json!({
                "server_id": "41771983423143937",
                "user_id": "104694319306248192",
                "session_id": "my_session_id",
                "token": "my_token",
            })
        );
    }

    #[test]
    fn select_protocol_layout() {
        let select = SelectProtocol {
            protocol: "udp",
            data: ProtocolData {
                address: "127.0.0.1".parse().unwrap(),
                port: 1337,
                mode: "xsalsa20_poly1305",
            },
        };

        assert_eq!(
            json::to_value(&select).unwrap(),
            json!({
                "protocol": "udp",
                "data": { "address": "127.0.0.1", "port": 1337, "mode": "xsalsa20_poly1305" },
            })
        );
    }

    #[test]
    fn ready_and_hello_decode() {
        let ready: Ready = json::from_str(
            r#"{"ssrc":1,"ip":"127.0.0.1","port":1234,"modes":["xsalsa20_poly1305"],"heartbeat_interval":1}"#,
        )
        .unwrap();
        assert_eq!(ready.ssrc, 1);
        assert_eq!(ready.port, 1234);

        let hello: Hello = json::from_str(r#"{"heartbeat_interval":41250.0}"#).unwrap();
        assert!((hello.heartbeat_interval - 41_250.0).abs() < f64::EPSILON);
    }
}
