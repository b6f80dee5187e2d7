use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DisposableError {
    #[error("Configuration is not set. Please run `disposable auth`.")]
    NotConfigured { path: String },

    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("failed to write config to {path}")]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("API request failed ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode API response: {message}")]
    Decode { message: String },

    #[error("SSH key error: {message}")]
    Key { message: String },

    #[error("SSH error: {message}")]
    Ssh { message: String },

    #[error("setup cancelled")]
    SetupCancelled,

    #[error("prompt error: {message}")]
    Prompt { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("failed to create droplet: {message}")]
    CreateFailed { message: String },

    #[error("session failed: {message}")]
    #[diagnostic(help("the droplet was destroyed before exiting"))]
    SessionFailed { message: String },

    #[error("droplet {id} could not be destroyed: the authorization token was revoked")]
    #[diagnostic(help(
        "You will need to manually destroy this droplet from the DigitalOcean control panel!"
    ))]
    ManualDeletionRequired { id: u64 },

    #[error("the API token was rejected")]
    #[diagnostic(help("Please run `disposable auth` to reset your token."))]
    Unauthorized,

    #[error("no Debian distribution image is available")]
    NoDebianImage,
}

impl DisposableError {
    /// HTTP status of a failed API call, if this error came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            DisposableError::Api { status, .. } => Some(*status),
            DisposableError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DisposableError::Io {
            context: context.into(),
            source,
        }
    }
}
