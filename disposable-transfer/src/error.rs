use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The tunnel server refused the request.
    #[error("{message} (HTTP {status})")]
    Rejected { status: u16, message: String },

    #[error("tunnel request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{message}")]
    Codec { message: String },

    #[error("{what} already exists: {path}")]
    AlreadyExists { what: &'static str, path: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl TransferError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TransferError::Io {
            context: context.into(),
            source,
        }
    }
}
