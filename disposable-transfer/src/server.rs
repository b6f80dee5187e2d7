//! Tunnel transfer server.
//!
//! Three routes: start an upload session, append a fragment to it, and fetch a
//! file or directory listing. Upload sessions live only in memory and are
//! keyed by a random id, so unrelated transfers never contend on anything but
//! the session map itself.

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

use crate::codec::{
    FETCH_PATH, FRAGMENT_PATH, FolderInfo, IS_FOLDER_HEADER, PERM_HEADER, START_SESSION_PATH,
    TRANSFER_ID_HEADER, TransferInit, format_perm,
};

pub use axum::serve::Listener;

/// Server-side state of one in-flight upload.
struct TransferSession {
    path: PathBuf,
    total_bytes: u64,
    written_bytes: u64,
    file: tokio::fs::File,
}

/// Shared state for the transfer routes.
#[derive(Clone)]
pub struct TransferState {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    sessions: Mutex<HashMap<String, Arc<Mutex<TransferSession>>>>,
}

impl TransferState {
    /// Relative request paths resolve against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Number of uploads that have started but not yet received all bytes.
    pub async fn active_sessions(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.inner.root.join(path)
    }

    async fn session(&self, id: &str) -> Option<Arc<Mutex<TransferSession>>> {
        self.inner.sessions.lock().await.get(id).cloned()
    }
}

/// A refused request, rendered as a status code plus a plain-text message.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("file already exists")]
    AlreadyExists,

    #[error("transfer not active")]
    NotActive,

    #[error("length unknown")]
    LengthUnknown,

    #[error("length greater than total required")]
    Overflow,

    #[error("no path given")]
    NoPath,

    #[error("file or folder does not exist")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("{context}: {source}")]
    Filesystem {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write fragment: {0}")]
    Write(#[source] std::io::Error),
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = match self {
            Rejection::Write(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        tracing::debug!(%status, error = %self, "rejecting transfer request");
        (status, self.to_string()).into_response()
    }
}

/// Directory mode derived from a file mode: every readable class may also
/// traverse, otherwise the file itself could not be created underneath.
pub fn directory_mode(perm: u32) -> u32 {
    let perm = perm & 0o777;
    perm | ((perm & 0o444) >> 2)
}

pub fn router(state: TransferState) -> Router {
    Router::new()
        .route(START_SESSION_PATH, post(start_session))
        .route(FRAGMENT_PATH, post(handle_fragment))
        .route(FETCH_PATH, get(fetch_path))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Serve the transfer routes on any listener until it stops yielding
/// connections.
pub async fn serve<L>(listener: L, state: TransferState) -> std::io::Result<()>
where
    L: Listener,
    L::Addr: Debug,
{
    axum::serve(listener, router(state)).await
}

async fn start_session(
    State(state): State<TransferState>,
    body: String,
) -> Result<String, Rejection> {
    let init = TransferInit::decode(&body).map_err(|e| Rejection::BadRequest(e.to_string()))?;
    let path = state.resolve(&init.local_path);

    if tokio::fs::symlink_metadata(&path).await.is_ok() {
        return Err(Rejection::AlreadyExists);
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::DirBuilder::new()
            .recursive(true)
            .mode(directory_mode(init.perm))
            .create(parent)
            .await
            .map_err(|source| Rejection::Filesystem {
                context: "failed to create parent directories",
                source,
            })?;
    }

    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(init.perm)
        .open(&path)
        .await
        .map_err(|source| match source.kind() {
            std::io::ErrorKind::AlreadyExists => Rejection::AlreadyExists,
            _ => Rejection::Filesystem {
                context: "failed to create file",
                source,
            },
        })?;
    file.set_permissions(Permissions::from_mode(init.perm))
        .await
        .map_err(|source| Rejection::Filesystem {
            context: "failed to set file permissions",
            source,
        })?;

    let id = uuid::Uuid::new_v4().to_string();
    if init.total_bytes == 0 {
        tracing::debug!(path = %path.display(), "created empty file");
        return Ok(id);
    }

    tracing::debug!(%id, path = %path.display(), total = init.total_bytes, "transfer started");
    let session = TransferSession {
        path,
        total_bytes: init.total_bytes,
        written_bytes: 0,
        file,
    };
    state
        .inner
        .sessions
        .lock()
        .await
        .insert(id.clone(), Arc::new(Mutex::new(session)));
    Ok(id)
}

async fn handle_fragment(
    State(state): State<TransferState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, Rejection> {
    let id = headers
        .get(TRANSFER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(Rejection::NotActive)?;
    let session = state.session(id).await.ok_or(Rejection::NotActive)?;

    if !headers.contains_key(header::CONTENT_LENGTH) {
        return Err(Rejection::LengthUnknown);
    }

    let mut session = session.lock().await;
    let length = body.len() as u64;
    if length > session.total_bytes - session.written_bytes {
        return Err(Rejection::Overflow);
    }

    session.file.write_all(&body).await.map_err(Rejection::Write)?;
    session.file.flush().await.map_err(Rejection::Write)?;
    session.written_bytes += length;

    if session.written_bytes == session.total_bytes {
        session.file.sync_all().await.map_err(Rejection::Write)?;
        state.inner.sessions.lock().await.remove(id);
        tracing::debug!(%id, path = %session.path.display(), "transfer complete");
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_path(
    State(state): State<TransferState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, Rejection> {
    let requested = params.get("path").map(String::as_str).unwrap_or_default();
    if requested.is_empty() {
        return Err(Rejection::NoPath);
    }

    let path = state.resolve(requested);
    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|_| Rejection::NotFound)?;
    let perm = meta.permissions().mode() & 0o7777;

    if meta.is_dir() {
        let mut contents = Vec::new();
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|source| Rejection::Filesystem {
                context: "failed to read directory",
                source,
            })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| Rejection::Filesystem {
                context: "failed to read directory",
                source,
            })?
        {
            contents.push(entry.file_name().to_string_lossy().into_owned());
        }
        contents.sort();

        let body = FolderInfo { perm, contents }
            .encode()
            .map_err(|e| Rejection::BadRequest(e.to_string()))?;
        return Ok(([(IS_FOLDER_HEADER, "true")], body).into_response());
    }

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|source| Rejection::Filesystem {
            context: "failed to open file",
            source,
        })?;
    let headers = [
        (IS_FOLDER_HEADER, "false".to_string()),
        (PERM_HEADER, format_perm(perm)),
        ("content-length", meta.len().to_string()),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
