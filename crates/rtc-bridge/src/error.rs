//! Error types shared across the crate.
//!
//! Expected conditions (an empty frame queue) are kept apart from misconfiguration and
//! engine failures so callers can poll without treating "nothing yet" as a failure.

use std::time::Duration;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error returned by service and connection operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to generate token: {0}")]
    Token(#[from] TokenError),
    #[error("connection was not established within {0:?}")]
    ConnectTimeout(Duration),
}

/// Invalid or missing configuration, reported before anything touches the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("empty app id")]
    EmptyAppId,
    #[error("empty app cert")]
    EmptyAppCert,
    #[error("empty user id")]
    EmptyUserId,
    #[error("empty channel name")]
    EmptyChannelName,
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),
    #[error("invalid channel count: {0}")]
    InvalidChannels(String),
    #[error("invalid audio mode: {0}")]
    InvalidAudioMode(String),
    #[error("pcm queue size must be greater than zero when receiving queued frames")]
    InvalidQueueSize,
}

/// A [`crate::token::TokenProvider`] could not issue a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is empty")]
    Empty,
    #[error("{0}")]
    Provider(String),
}

/// A call into the engine returned a non-zero status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to {op}, return {code}")]
pub struct EngineError {
    pub op: &'static str,
    pub code: i32,
}

impl EngineError {
    pub fn new(op: &'static str, code: i32) -> Self {
        Self { op, code }
    }

    /// Map an engine status code (`0` = success) into a `Result`.
    pub fn check(op: &'static str, code: i32) -> Result<(), EngineError> {
        if code == 0 {
            Ok(())
        } else {
            Err(Self::new(op, code))
        }
    }
}

/// Outcome of fetching a received frame from a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// No frame is queued right now; poll again later.
    #[error("the pcm queue is empty")]
    Empty,
    /// The connection was created without a frame queue.
    #[error("the pcm queue is not initialized")]
    QueueDisabled,
}

impl FetchError {
    /// `true` for the expected, retryable "nothing queued yet" signal.
    pub fn is_empty(&self) -> bool {
        matches!(self, FetchError::Empty)
    }
}

/// A received frame cannot be interpreted as 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameShapeError {
    #[error("unsupported sample width: {0} bytes")]
    UnsupportedSampleWidth(usize),
    #[error("empty frame buffer")]
    EmptyBuffer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_check_maps_status_codes() {
        assert!(EngineError::check("connect", 0).is_ok());
        let err = EngineError::check("connect", -7).unwrap_err();
        assert_eq!(err, EngineError::new("connect", -7));
        assert_eq!(err.to_string(), "failed to connect, return -7");
    }

    #[test]
    fn fetch_error_empty_is_distinct_from_misconfiguration() {
        assert!(FetchError::Empty.is_empty());
        assert!(!FetchError::QueueDisabled.is_empty());
    }

    #[test]
    fn token_error_converts_into_error() {
        let err: Error = TokenError::Provider("signing key missing".into()).into();
        assert!(matches!(err, Error::Token(TokenError::Provider(_))));
        assert_eq!(err.to_string(), "failed to generate token: signing key missing");
    }
}
