use std::error::Error as StdError;
use std::fmt;

use reqwest::{Error as ReqwestError, StatusCode};

/// An error from the [`http`] module.
///
/// [`http`]: crate::http
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Reqwest's Error contain information on why sending a request failed.
    Request(ReqwestError),
    /// When a non-successful status code was received for a request.
    UnsuccessfulRequest { status: StatusCode, body: String },
    /// A ratelimit header held something other than a number.
    InvalidHeader(&'static str),
}

impl From<ReqwestError> for Error {
    fn from(error: ReqwestError) -> Self {
        Self::Request(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(_) => f.write_str("Error while sending HTTP request."),
            Self::UnsuccessfulRequest {
                status,
                body,
            } => write!(f, "Request failed with {status}: {body}"),
            Self::InvalidHeader(name) => write!(f, "Header {name} is not a valid number"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Request(inner) => Some(inner),
            _ => None,
        }
    }
}
