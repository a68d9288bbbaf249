use std::fmt;

use url::Url;

use super::GatewayError;
use crate::model::gateway::CurrentUser;

/// An enum to indicate where a [`Shard`] is in its connection lifecycle.
///
/// [`Shard`]: super::Shard
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum ConnectionStage {
    /// Indicator that the [`Shard`] is fully disconnected and is not in a reconnecting phase.
    ///
    /// [`Shard`]: super::Shard
    Disconnected,
    /// Indicator that the [`Shard`] is opening a socket and waiting for the Hello.
    ///
    /// [`Shard`]: super::Shard
    Connecting,
    /// Indicator that the [`Shard`] has sent an IDENTIFY packet and is awaiting a READY packet.
    ///
    /// [`Shard`]: super::Shard
    Identifying,
    /// Indicator that the [`Shard`] has sent a RESUME packet and is awaiting a RESUMED packet.
    ///
    /// [`Shard`]: super::Shard
    Resuming,
    /// Indicator that the [`Shard`] is normally connected and is not in, e.g., a resume phase.
    ///
    /// [`Shard`]: super::Shard
    Connected,
    /// Indicator that the [`Shard`] lost its connection and is waiting to try again.
    ///
    /// [`Shard`]: super::Shard
    Reconnecting,
}

impl ConnectionStage {
    /// Whether the stage is a form of connecting.
    ///
    /// This will return `true` on:
    /// - [`Connecting`][`ConnectionStage::Connecting`]
    /// - [`Identifying`][`ConnectionStage::Identifying`]
    /// - [`Resuming`][`ConnectionStage::Resuming`]
    ///
    /// All other variants will return `false`.
    ///
    /// # Examples
    ///
    /// Assert that [`ConnectionStage::Identifying`] is a connecting stage:
    ///
    /// ```rust
    /// use sonority::gateway::ConnectionStage;
    ///
    /// assert!(ConnectionStage::Identifying.is_connecting());
    /// ```
    ///
    /// Assert that [`ConnectionStage::Connected`] is _not_ a connecting stage:
    ///
    /// ```rust
    /// use sonority::gateway::ConnectionStage;
    ///
    /// assert!(!ConnectionStage::Connected.is_connecting());
    /// ```
    #[must_use]
    pub fn is_connecting(self) -> bool {
        use self::ConnectionStage::{Connecting, Identifying, Resuming};
        matches!(self, Connecting | Identifying | Resuming)
    }

    /// Whether the state machine allows moving from this stage to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use self::ConnectionStage::*;

        match (self, next) {
            (Disconnected | Reconnecting, Connecting)
            | (Connecting, Identifying | Resuming)
            | (Resuming, Identifying)
            | (Identifying | Resuming, Connected)
            | (Connecting | Identifying | Resuming | Connected, Reconnecting) => true,
            (from, Disconnected) => from != Disconnected,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// Everything about a gateway session that outlives a single socket.
///
/// Guarded by a single lock on the shard, so that the stage and the resume data always change
/// together.
#[derive(Debug)]
pub(crate) struct SessionState {
    stage: ConnectionStage,
    session_id: Option<String>,
    sequence: u64,
    resume_url: Option<Url>,
    user: Option<CurrentUser>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            stage: ConnectionStage::Disconnected,
            session_id: None,
            sequence: 0,
            resume_url: None,
            user: None,
        }
    }

    pub fn stage(&self) -> ConnectionStage {
        self.stage
    }

    /// Moves to `next`, refusing transitions the state machine does not allow.
    pub fn advance(&mut self, next: ConnectionStage) -> Result<(), GatewayError> {
        if !self.stage.can_transition_to(next) {
            return Err(GatewayError::IllegalTransition {
                from: self.stage,
                to: next,
            });
        }

        self.stage = next;
        Ok(())
    }

    /// Whether the next connection should resume rather than identify.
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence > 0
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The sequence as sent in heartbeats: `null` until the first dispatch.
    pub fn last_sequence(&self) -> Option<u64> {
        (self.sequence > 0).then_some(self.sequence)
    }

    pub fn resume_url(&self) -> Option<&Url> {
        self.resume_url.as_ref()
    }

    pub fn user(&self) -> Option<&CurrentUser> {
        self.user.as_ref()
    }

    /// Records the sequence of a dispatch; the sequence never moves backwards.
    pub fn observe_sequence(&mut self, sequence: u64) {
        if sequence > self.sequence {
            self.sequence = sequence;
        }
    }

    pub fn start_session(
        &mut self,
        session_id: String,
        sequence: u64,
        resume_url: Option<Url>,
        user: CurrentUser,
    ) {
        self.session_id = Some(session_id);
        self.sequence = sequence;
        self.resume_url = resume_url;
        self.user = Some(user);
    }

    /// Forgets the session, so that the next connection identifies.
    pub fn clear_session(&mut self) {
        self.session_id = None;
        self.sequence = 0;
        self.resume_url = None;
    }

    /// Stops without forgetting the session, after a failed connect or a refused configuration.
    pub fn mark_disconnected(&mut self) {
        self.stage = ConnectionStage::Disconnected;
    }

    /// Ends the session after a user-initiated disconnect.
    pub fn reset(&mut self) {
        self.clear_session();
        self.stage = ConnectionStage::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::id::UserId;

    fn user() -> CurrentUser {
        crate::json::from_str(r#"{"id": "1", "username": "bot"}"#).unwrap()
    }

    #[test]
    fn happy_path_transitions() {
        let mut state = SessionState::new();

        state.advance(ConnectionStage::Connecting).unwrap();
        state.advance(ConnectionStage::Identifying).unwrap();
        state.advance(ConnectionStage::Connected).unwrap();
        state.advance(ConnectionStage::Reconnecting).unwrap();
        state.advance(ConnectionStage::Connecting).unwrap();
        state.advance(ConnectionStage::Resuming).unwrap();
        state.advance(ConnectionStage::Identifying).unwrap();
        state.advance(ConnectionStage::Connected).unwrap();
        state.advance(ConnectionStage::Disconnected).unwrap();
    }

    #[test]
    fn identify_while_connected_is_rejected() {
        let mut state = SessionState::new();
        state.advance(ConnectionStage::Connecting).unwrap();
        state.advance(ConnectionStage::Identifying).unwrap();
        state.advance(ConnectionStage::Connected).unwrap();

        let error = state.advance(ConnectionStage::Identifying).unwrap_err();
        assert!(matches!(
            error,
            GatewayError::IllegalTransition {
                from: ConnectionStage::Connected,
                to: ConnectionStage::Identifying,
            }
        ));
        assert_eq!(state.stage(), ConnectionStage::Connected);
    }

    #[test]
    fn connecting_twice_is_rejected() {
        let mut state = SessionState::new();
        state.advance(ConnectionStage::Connecting).unwrap();

        assert!(state.advance(ConnectionStage::Connecting).is_err());
        assert!(!ConnectionStage::Disconnected.can_transition_to(ConnectionStage::Disconnected));
    }

    #[test]
    fn sequence_only_moves_forward() {
        let mut state = SessionState::new();
        assert_eq!(state.last_sequence(), None);

        state.observe_sequence(5);
        state.observe_sequence(3);
        assert_eq!(state.sequence(), 5);
        assert_eq!(state.last_sequence(), Some(5));
    }

    #[test]
    fn reset_forces_identify() {
        let mut state = SessionState::new();
        state.start_session("abc".into(), 12, None, user());
        assert!(state.can_resume());
        assert_eq!(state.user().map(|u| u.id), Some(UserId::new(1)));

        state.reset();
        assert!(!state.can_resume());
        assert_eq!(state.session_id(), None);
        assert_eq!(state.sequence(), 0);
    }
}
