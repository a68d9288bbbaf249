use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;

use tokio_tungstenite::tungstenite::error::Error as TungsteniteError;

use crate::gateway::GatewayError;
use crate::http::HttpError;
use crate::json::JsonError;
use crate::voice::VoiceError;

/// The common result type between most library functions.
///
/// The library exposes functions which, for a result type, exposes only one type, rather than the
/// usual 2 (`Result<T, Error>`). This is because all functions that return a result return
/// sonority's [`Error`], so this is implied, and a "simpler" result is used.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A common error enum returned by most of the library's functionality within a custom
/// [`Result`].
///
/// The most common error types, the [`GatewayError`] and [`VoiceError`] enums, are both wrapped
/// around this in the form of the [`Self::Gateway`] and [`Self::Voice`] variants.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An error from the [`gateway`] module.
    ///
    /// [`gateway`]: crate::gateway
    Gateway(GatewayError),
    /// An error from the [`http`] module.
    ///
    /// [`http`]: crate::http
    Http(HttpError),
    /// An [`std::io`] error.
    Io(IoError),
    /// An error from the [`serde_json`] crate.
    Json(JsonError),
    /// An error from the `tungstenite` crate.
    Tungstenite(Box<TungsteniteError>),
    /// An error from the [`url`] crate.
    Url(url::ParseError),
    /// An error from the [`voice`] module.
    ///
    /// [`voice`]: crate::voice
    Voice(VoiceError),
}

impl From<GatewayError> for Error {
    fn from(e: GatewayError) -> Error {
        Error::Gateway(e)
    }
}

impl From<HttpError> for Error {
    fn from(e: HttpError) -> Error {
        Error::Http(e)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Error {
        Error::Io(e)
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Error {
        Error::Tungstenite(Box::new(e))
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Error {
        Error::Url(e)
    }
}

impl From<VoiceError> for Error {
    fn from(e: VoiceError) -> Error {
        Error::Voice(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Error {
        Error::Http(HttpError::Request(e))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway(inner) => fmt::Display::fmt(&inner, f),
            Self::Http(inner) => fmt::Display::fmt(&inner, f),
            Self::Io(inner) => fmt::Display::fmt(&inner, f),
            Self::Json(inner) => fmt::Display::fmt(&inner, f),
            Self::Tungstenite(inner) => fmt::Display::fmt(&inner, f),
            Self::Url(inner) => fmt::Display::fmt(&inner, f),
            Self::Voice(inner) => fmt::Display::fmt(&inner, f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Gateway(inner) => Some(inner),
            Self::Http(inner) => Some(inner),
            Self::Io(inner) => Some(inner),
            Self::Json(inner) => Some(inner),
            Self::Tungstenite(inner) => Some(inner),
            Self::Url(inner) => Some(inner),
            Self::Voice(inner) => Some(inner),
        }
    }
}
