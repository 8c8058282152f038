use std::io;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // UTILITIES
    #[error("{wrapped}")]
    Wrapped {
        #[from]
        wrapped: WrappedError,
    },

    // INDIVIDUAL ERRORS
    #[error("reminder service not authorized")]
    AuthDenied,

    #[error("assignment solver returned no valid solution")]
    Assignment,

    #[error("malformed block token: {token}")]
    BlockToken { token: String },

    #[error("missing configuration: {what}")]
    ConfigMissing { what: String },

    #[error("writing task line in {file}: {source}")]
    DocIo { file: String, source: io::Error },

    #[error("task line for '{uuid}' not found in {file}")]
    DocNotFound { uuid: String, file: String },

    #[error("reading config: {source}")]
    Figment {
        #[from]
        source: figment::Error,
    },

    #[error("gateway timed out after {seconds}s: {operation}")]
    GatewayTimeout { operation: String, seconds: u64 },

    #[error("id collision exhausted for prefix {prefix}")]
    IdCollision { prefix: String },

    #[error("i/o: {source}")]
    IO {
        #[from]
        source: io::Error,
    },

    #[error("link store {path}: {source}")]
    LinkStoreIo { path: String, source: io::Error },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("failed to parse time: {source}")]
    ParseTime {
        #[from]
        source: chrono::ParseError,
    },

    #[error("reminder {item_id} is gone")]
    RemNotFound { item_id: String },

    #[error("saving reminder {item_id}: {message}")]
    RemSave { item_id: String, message: String },

    #[error("failed to parse JSON: {source}")]
    SerdeJSON {
        #[from]
        source: serde_json::Error,
    },

    #[error("failed to parse YAML: {source}")]
    SerdeYAML {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("parsing utf8: {source}")]
    Utf8 {
        #[from]
        source: std::str::Utf8Error,
    },
}

impl Error {
    /// Fatal errors abort the vault; everything else becomes a counter bump
    /// plus a log line at the component boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::LinkStoreIo { .. } | Error::ConfigMissing { .. } | Error::Figment { .. }
        )
    }
}

#[derive(Debug, Error)]
#[error("while {context}: {what}")]
pub struct WrappedError {
    context: Arc<str>,
    what: Box<Error>,
}

pub trait WrapError {
    type OkT;

    fn during(self, context: &str) -> Result<Self::OkT, WrappedError>;

    fn during_f<F: FnOnce() -> Arc<str>>(self, context_f: F) -> Result<Self::OkT, WrappedError>;
}

impl<T, E> WrapError for Result<T, E>
where
    E: Into<Error>,
{
    type OkT = T;

    fn during(self, context: &str) -> Result<Self::OkT, WrappedError> {
        self.map_err(|err| WrappedError {
            context: context.into(),
            what: Box::new(err.into()),
        })
    }

    fn during_f<F: FnOnce() -> Arc<str>>(self, context_f: F) -> Result<Self::OkT, WrappedError> {
        self.map_err(|err| WrappedError {
            context: context_f(),
            what: Box::new(err.into()),
        })
    }
}

pub fn handle_load_error(path: &camino::Utf8Path, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::NotFound {
        Error::NotFound {
            what: path.to_string(),
        }
    } else {
        err.into()
    }
}
