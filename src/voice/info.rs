use std::fmt;

use super::VoiceError;
use crate::model::id::{GuildId, UserId};

/// What a pending or established call learned from the gateway.
#[derive(Clone, Debug)]
pub(crate) enum ConnectionProgress {
    Complete(ConnectionInfo),
    Incomplete(Partial),
}

/// Whether a gateway update requires the call to connect anew.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Progress {
    /// Still waiting for the other half.
    Pending,
    /// Both halves arrived; the call can connect.
    Ready(ConnectionInfo),
    /// An established call was moved to another session or server.
    Changed(ConnectionInfo),
    /// Nothing changed for an established call.
    Unchanged,
}

impl ConnectionProgress {
    pub fn new(guild_id: GuildId, user_id: UserId) -> Self {
        ConnectionProgress::Incomplete(Partial {
            guild_id,
            user_id,
            endpoint: None,
            session_id: None,
            token: None,
        })
    }

    pub fn info(&self) -> Option<&ConnectionInfo> {
        match self {
            Self::Complete(info) => Some(info),
            Self::Incomplete(_) => None,
        }
    }

    /// Applies the session ID of the bot's voice state.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::DuplicateStateUpdate`] if a voice state already arrived but the voice
    /// server did not.
    pub fn apply_state_update(&mut self, session_id: String) -> Result<Progress, VoiceError> {
        match self {
            Self::Complete(info) => {
                if info.session_id == session_id {
                    return Ok(Progress::Unchanged);
                }

                info.session_id = session_id;
                Ok(Progress::Changed(info.clone()))
            },
            Self::Incomplete(partial) => {
                if partial.session_id.is_some() {
                    return Err(VoiceError::DuplicateStateUpdate);
                }

                partial.session_id = Some(session_id);
                Ok(self.finalise())
            },
        }
    }

    /// Applies the endpoint and token of a voice server update.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::DuplicateServerUpdate`] if a voice server already arrived but the
    /// voice state did not.
    pub fn apply_server_update(
        &mut self,
        endpoint: String,
        token: String,
    ) -> Result<Progress, VoiceError> {
        match self {
            Self::Complete(info) => {
                if info.endpoint == endpoint && info.token == token {
                    return Ok(Progress::Unchanged);
                }

                info.endpoint = endpoint;
                info.token = token;
                Ok(Progress::Changed(info.clone()))
            },
            Self::Incomplete(partial) => {
                if partial.endpoint.is_some() {
                    return Err(VoiceError::DuplicateServerUpdate);
                }

                partial.endpoint = Some(endpoint);
                partial.token = Some(token);
                Ok(self.finalise())
            },
        }
    }

    fn finalise(&mut self) -> Progress {
        let Self::Incomplete(partial) = self else { return Progress::Unchanged };

        let (Some(endpoint), Some(session_id), Some(token)) =
            (partial.endpoint.clone(), partial.session_id.clone(), partial.token.clone())
        else {
            return Progress::Pending;
        };

        let info = ConnectionInfo {
            endpoint,
            guild_id: partial.guild_id,
            session_id,
            token,
            user_id: partial.user_id,
        };

        *self = Self::Complete(info.clone());
        Progress::Ready(info)
    }
}

/// Parameters and information needed to start communicating with Discord's voice servers.
#[derive(Clone, Eq, PartialEq)]
pub struct ConnectionInfo {
    /// URL of the voice websocket gateway server assigned to this call.
    pub endpoint: String,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string describing this session for validation/authentication purposes.
    pub session_id: String,
    /// Ephemeral secret used to validate the above session.
    pub token: String,
    /// UserID of this bot.
    pub user_id: UserId,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct Partial {
    endpoint: Option<String>,
    guild_id: GuildId,
    session_id: Option<String>,
    token: Option<String>,
    user_id: UserId,
}

impl fmt::Debug for Partial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partial")
            .field("endpoint", &self.endpoint)
            .field("session_id", &self.session_id)
            .field("token_is_some", &self.token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress() -> ConnectionProgress {
        ConnectionProgress::new(GuildId::new(1), UserId::new(2))
    }

    #[test]
    fn completes_in_either_order() {
        let mut state_first = progress();
        assert_eq!(state_first.apply_state_update("s".into()).unwrap(), Progress::Pending);
        let Progress::Ready(a) = state_first.apply_server_update("e".into(), "t".into()).unwrap()
        else {
            panic!("expected the join to complete");
        };

        let mut server_first = progress();
        assert_eq!(
            server_first.apply_server_update("e".into(), "t".into()).unwrap(),
            Progress::Pending
        );
        let Progress::Ready(b) = server_first.apply_state_update("s".into()).unwrap() else {
            panic!("expected the join to complete");
        };

        assert_eq!(a, b);
        assert_eq!(a.endpoint, "e");
        assert_eq!(a.session_id, "s");
        assert_eq!(a.token, "t");
        assert_eq!(a.guild_id, GuildId::new(1));
    }

    #[test]
    fn duplicates_before_completion_are_errors() {
        let mut p = progress();
        p.apply_state_update("s".into()).unwrap();
        assert!(matches!(
            p.apply_state_update("s2".into()),
            Err(VoiceError::DuplicateStateUpdate)
        ));

        let mut p = progress();
        p.apply_server_update("e".into(), "t".into()).unwrap();
        assert!(matches!(
            p.apply_server_update("e".into(), "t".into()),
            Err(VoiceError::DuplicateServerUpdate)
        ));
    }

    #[test]
    fn established_calls_report_changes() {
        let mut p = progress();
        p.apply_state_update("s".into()).unwrap();
        p.apply_server_update("e".into(), "t".into()).unwrap();

        assert_eq!(p.apply_state_update("s".into()).unwrap(), Progress::Unchanged);
        assert_eq!(p.apply_server_update("e".into(), "t".into()).unwrap(), Progress::Unchanged);

        let Progress::Changed(info) = p.apply_server_update("e2".into(), "t2".into()).unwrap()
        else {
            panic!("expected a server change");
        };
        assert_eq!(info.endpoint, "e2");
        assert_eq!(p.info().map(|i| i.token.as_str()), Some("t2"));
    }
}
