//! Error taxonomy for the autoupdate engine.
//!
//! Errors fall into three audiences:
//!
//! - Request authors get [`RequestError`]: the request body was malformed
//!   or a fetched value did not match the declared relation shape. These
//!   are fatal to the request, never to the server.
//! - Operators get wrapped transport failures from the data provider,
//!   carrying the operation context in the message.
//! - Programmer contract violations (such as overlapping `update` and
//!   `keys` on one builder) are ruled out structurally by `&mut` receivers
//!   and have no runtime representation.

use crate::key::Key;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Failure type returned by [`DataProvider`](crate::DataProvider)
/// implementations. The engine wraps it with operation context.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed request or relation value, user-visible.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Configuration loading or validation failures.
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// The initial key resolution of a fresh builder failed.
    #[error("build keys for the first time: {source}")]
    FirstBuild {
        #[source]
        source: Box<Error>,
    },

    /// The data provider failed while the resolver expanded relations.
    #[error("load needed keys: {source}")]
    LoadKeys {
        #[source]
        source: ProviderError,
    },

    /// The data provider failed while a connection reloaded values.
    #[error("load restricted data: {source}")]
    LoadData {
        #[source]
        source: ProviderError,
    },

    /// The resolver did not reach a fixpoint within the configured bound.
    #[error("key resolution did not settle after {rounds} rounds")]
    ResolutionOverflow { rounds: usize },

    /// The service shutdown signal tripped.
    #[error("autoupdate service is closed")]
    Closed,
}

/// User-visible failures around the request wire format and relation
/// values.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The request body has the wrong structure. The message names the
    /// offending field and the expected shape.
    #[error("{msg}")]
    Invalid { msg: String },

    /// The request body is not syntactically valid JSON.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// A fetched relation value did not match the declared shape.
    #[error("invalid value in key `{key}`: got {got}, expected {expect}")]
    Value {
        key: Key,
        got: String,
        expect: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

impl RequestError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        RequestError::Invalid { msg: msg.into() }
    }

    pub(crate) fn value(key: Key, got: impl Into<String>, expect: impl Into<String>) -> Self {
        RequestError::Value {
            key,
            got: got.into(),
            expect: expect.into(),
            source: None,
        }
    }
}
