use crate::models::DocumentStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Access token has expired")]
    TokenExpired,

    #[error("Access token is invalid")]
    TokenInvalid,

    #[error("Document is closed ({0})")]
    DocumentClosed(DocumentStatus),

    #[error("Recipient has already signed")]
    AlreadySigned,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unable to render signed document: {0}")]
    RenderFailure(String),

    #[error("Unable to send notification: {0}")]
    NotifyFailure(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Blob storage error: {0}")]
    Blob(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for the hard stops a caller must never retry.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::DocumentClosed(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Blob(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(format!("unable to encode record: {}", err))
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<tera::Error> for Error {
    fn from(err: tera::Error) -> Self {
        Error::NotifyFailure(format!("unable to render template: {}", err))
    }
}

impl From<lettre::error::Error> for Error {
    fn from(err: lettre::error::Error) -> Self {
        Error::NotifyFailure(format!("unable to generate email: {}", err))
    }
}

#[cfg(feature = "postgres")]
impl From<diesel::result::Error> for Error {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => Error::NotFound("record".to_string()),
            err => Error::Storage(err.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Self {
        Error::Storage(format!("unable to get DB pool connection: {}", err))
    }
}

#[cfg(feature = "postgres")]
impl From<diesel::ConnectionError> for Error {
    fn from(err: diesel::ConnectionError) -> Self {
        Error::Storage(format!("unable to connect to database: {}", err))
    }
}
