//! Transfer client: push local trees to the tunnel server and pull remote
//! trees back.
//!
//! Both directions are strictly sequential. One session per file, one
//! fragment in flight at a time.

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use walkdir::WalkDir;

use crate::codec::{
    CHUNK_SIZE, DEFAULT_TUNNEL_PORT, FETCH_PATH, FRAGMENT_PATH, FolderInfo, IS_FOLDER_HEADER,
    PERM_HEADER, START_SESSION_PATH, TRANSFER_ID_HEADER, TUNNEL_ENV, TUNNEL_HOST, TransferInit,
    parse_is_folder, parse_perm,
};
use crate::error::TransferError;

/// Totals for one push invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub files: usize,
    pub fragments: usize,
    pub bytes: u64,
}

/// Totals for one pull invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PullReport {
    pub files: usize,
    pub folders: usize,
    pub bytes: u64,
}

/// What a fetch returned.
#[derive(Debug)]
pub enum Fetched {
    Folder(FolderInfo),
    /// File contents are still unread in `body`.
    File { perm: u32, body: reqwest::Response },
}

pub struct TransferClient {
    http: reqwest::Client,
    base: String,
}

/// Base URL of the tunnel as seen from the droplet.
pub fn default_base_url() -> String {
    format!("http://{TUNNEL_HOST}:{DEFAULT_TUNNEL_PORT}")
}

/// Where a transfer lands when the caller names no destination:
/// `./<basename>` in the working directory.
pub fn default_destination(source: &str) -> String {
    match Path::new(source).file_name() {
        Some(name) => format!("./{}", name.to_string_lossy()),
        None => ".".to_string(),
    }
}

fn join_remote(base: &str, child: impl AsRef<Path>) -> String {
    Path::new(base).join(child).to_string_lossy().into_owned()
}

impl TransferClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder().build()?;
        let base = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base })
    }

    /// Client for the tunnel named by `DISPOSABLE_TUNNEL`, or the default
    /// loopback endpoint.
    pub fn from_env() -> Result<Self, TransferError> {
        let base = std::env::var(TUNNEL_ENV).unwrap_or_else(|_| default_base_url());
        Self::new(base)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub async fn start_session(&self, init: &TransferInit) -> Result<String, TransferError> {
        let response = self
            .http
            .post(self.url(START_SESSION_PATH))
            .body(init.encode()?)
            .send()
            .await?;
        let response = accepted(response).await?;
        Ok(response.text().await?.trim().to_string())
    }

    pub async fn upload_fragment(&self, id: &str, fragment: Vec<u8>) -> Result<(), TransferError> {
        let response = self
            .http
            .post(self.url(FRAGMENT_PATH))
            .header(TRANSFER_ID_HEADER, id)
            .body(fragment)
            .send()
            .await?;
        accepted(response).await?;
        Ok(())
    }

    pub async fn fetch(&self, path: &str) -> Result<Fetched, TransferError> {
        let response = self
            .http
            .get(self.url(FETCH_PATH))
            .query(&[("path", path)])
            .send()
            .await?;
        let response = accepted(response).await?;

        let is_folder = header_str(&response, IS_FOLDER_HEADER)?;
        if parse_is_folder(&is_folder)? {
            let body = response.text().await?;
            return Ok(Fetched::Folder(FolderInfo::decode(&body)?));
        }

        let perm = parse_perm(&header_str(&response, PERM_HEADER)?)?;
        Ok(Fetched::File {
            perm,
            body: response,
        })
    }

    /// Push a file, or every regular file under a directory, to `destination`
    /// on the server side.
    pub async fn push(&self, source: &Path, destination: &str) -> Result<PushReport, TransferError> {
        let meta = tokio::fs::metadata(source)
            .await
            .map_err(|e| TransferError::io(format!("cannot read {}", source.display()), e))?;

        let mut report = PushReport::default();
        if !meta.is_dir() {
            self.push_file(source, destination, &mut report).await?;
            return Ok(report);
        }

        for entry in WalkDir::new(source).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                TransferError::io(format!("walking {}", source.display()), e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| TransferError::Protocol {
                    message: format!("{} escaped {}: {e}", entry.path().display(), source.display()),
                })?;
            let remote = join_remote(destination, relative);
            self.push_file(entry.path(), &remote, &mut report).await?;
        }
        Ok(report)
    }

    async fn push_file(
        &self,
        local: &Path,
        remote: &str,
        report: &mut PushReport,
    ) -> Result<(), TransferError> {
        let context = || format!("reading {}", local.display());
        let mut file = tokio::fs::File::open(local)
            .await
            .map_err(|e| TransferError::io(context(), e))?;
        let meta = file
            .metadata()
            .await
            .map_err(|e| TransferError::io(context(), e))?;

        let init = TransferInit {
            local_path: remote.to_string(),
            total_bytes: meta.len(),
            perm: meta.permissions().mode() & 0o7777,
        };
        let id = self.start_session(&init).await?;
        tracing::debug!(%id, local = %local.display(), remote, total = init.total_bytes, "pushing");

        let mut sent = 0u64;
        while sent < init.total_bytes {
            let mut fragment = Vec::with_capacity(CHUNK_SIZE);
            (&mut file)
                .take(CHUNK_SIZE as u64)
                .read_to_end(&mut fragment)
                .await
                .map_err(|e| TransferError::io(context(), e))?;
            if fragment.is_empty() {
                return Err(TransferError::Protocol {
                    message: format!(
                        "{} shrank while being sent ({sent} of {} bytes)",
                        local.display(),
                        init.total_bytes
                    ),
                });
            }
            sent += fragment.len() as u64;
            report.fragments += 1;
            self.upload_fragment(&id, fragment).await?;
        }

        report.files += 1;
        report.bytes += sent;
        Ok(())
    }

    /// Pull a file or directory tree from the server into `destination`.
    pub async fn pull(&self, source: &str, destination: &Path) -> Result<PullReport, TransferError> {
        let mut report = PullReport::default();
        self.pull_entry(source.to_string(), destination.to_path_buf(), &mut report)
            .await?;
        Ok(report)
    }

    fn pull_entry<'a>(
        &'a self,
        remote: String,
        local: PathBuf,
        report: &'a mut PullReport,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + 'a>> {
        Box::pin(async move {
            match self.fetch(&remote).await? {
                Fetched::Folder(info) => {
                    if tokio::fs::symlink_metadata(&local).await.is_ok() {
                        return Err(TransferError::AlreadyExists {
                            what: "folder",
                            path: local.display().to_string(),
                        });
                    }
                    // Owner keeps write access until the children are in place.
                    tokio::fs::DirBuilder::new()
                        .recursive(true)
                        .mode(info.perm | 0o700)
                        .create(&local)
                        .await
                        .map_err(|e| TransferError::io(format!("creating {}", local.display()), e))?;
                    report.folders += 1;

                    for child in &info.contents {
                        self.pull_entry(join_remote(&remote, child), local.join(child), report)
                            .await?;
                    }
                    set_mode(&local, info.perm).await
                }
                Fetched::File { perm, body } => {
                    let target = file_target(&remote, local).await?;
                    let written = write_body(&target, body).await?;
                    set_mode(&target, perm).await?;
                    report.files += 1;
                    report.bytes += written;
                    Ok(())
                }
            }
        })
    }
}

async fn accepted(response: reqwest::Response) -> Result<reqwest::Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(TransferError::Rejected {
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}

fn header_str(response: &reqwest::Response, name: &str) -> Result<String, TransferError> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| TransferError::Protocol {
            message: format!("response is missing the {name} header"),
        })
}

/// Resolve where a pulled file goes: inside `local` when it is a directory,
/// at `local` itself when nothing is there yet.
async fn file_target(remote: &str, local: PathBuf) -> Result<PathBuf, TransferError> {
    match tokio::fs::metadata(&local).await {
        Ok(meta) if meta.is_dir() => {
            let name = Path::new(remote)
                .file_name()
                .ok_or_else(|| TransferError::Protocol {
                    message: format!("{remote} has no file name"),
                })?;
            Ok(local.join(name))
        }
        Ok(_) => Err(TransferError::AlreadyExists {
            what: "file",
            path: local.display().to_string(),
        }),
        Err(_) => Ok(local),
    }
}

async fn write_body(target: &Path, body: reqwest::Response) -> Result<u64, TransferError> {
    let context = || format!("writing {}", target.display());
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => TransferError::AlreadyExists {
                what: "file",
                path: target.display().to_string(),
            },
            _ => TransferError::io(context(), e),
        })?;

    let mut written = 0u64;
    let mut stream = body.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| TransferError::io(context(), e))?;
        written += chunk.len() as u64;
    }
    file.sync_all()
        .await
        .map_err(|e| TransferError::io(context(), e))?;
    Ok(written)
}

async fn set_mode(path: &Path, perm: u32) -> Result<(), TransferError> {
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(perm))
        .await
        .map_err(|e| TransferError::io(format!("setting permissions on {}", path.display()), e))
}
