enum_number! {
    /// Discord Voice Gateway Websocket close codes.
    ///
    /// [Discord docs](https://discord.com/developers/docs/topics/opcodes-and-status-codes#voice-voice-close-event-codes).
    pub enum CloseCode: u16 {
        /// Invalid Voice OP Code.
        UnknownOpcode = 4001,
        /// Invalid identification payload sent.
        InvalidPayload = 4002,
        /// A payload was sent prior to identifying.
        NotAuthenticated = 4003,
        /// The account token sent with the identify payload was incorrect.
        AuthenticationFailed = 4004,
        /// More than one identify payload was sent.
        AlreadyAuthenticated = 4005,
        /// The session is no longer valid.
        SessionInvalid = 4006,
        /// A session timed out.
        SessionTimeout = 4009,
        /// The server for the last connection attempt could not be found.
        ServerNotFound = 4011,
        /// Discord did not recognise the voice protocol chosen.
        UnknownProtocol = 4012,
        /// Disconnected, either due to channel closure/removal or kicking.
        ///
        /// Should not reconnect.
        Disconnected = 4014,
        /// Connected voice server crashed.
        ///
        /// Should resume.
        VoiceServerCrash = 4015,
        /// Discord didn't recognise the encryption scheme.
        UnknownEncryptionMode = 4016,
    }
}

impl CloseCode {
    /// Whether a connection closed with this code must not be re-established.
    ///
    /// Codes the library does not know about are retried.
    #[must_use]
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed
                | Self::SessionInvalid
                | Self::ServerNotFound
                | Self::Disconnected
                | Self::VoiceServerCrash
        )
    }
}
