//! Wire vocabulary shared by the tunnel server and the transfer client.

use facet::Facet;

use crate::error::TransferError;

/// Port the tunnel listens on, on the droplet's loopback interface.
pub const DEFAULT_TUNNEL_PORT: u16 = 8190;

/// Address the tunnel is bound to on the droplet.
pub const TUNNEL_HOST: &str = "127.0.0.1";

/// Environment variable overriding the tunnel base URL for the transfer tools.
pub const TUNNEL_ENV: &str = "DISPOSABLE_TUNNEL";

/// Size of one upload fragment.
pub const CHUNK_SIZE: usize = 1_000_000;

pub const START_SESSION_PATH: &str = "/v1/StartTransferSession";
pub const FRAGMENT_PATH: &str = "/v1/HandleFragment";
pub const FETCH_PATH: &str = "/v1/GetHost";

pub const TRANSFER_ID_HEADER: &str = "Transfer-ID";
pub const IS_FOLDER_HEADER: &str = "Is-Folder";
pub const PERM_HEADER: &str = "Perm";

/// Body of a start-session request.
#[derive(Debug, Clone, PartialEq, Facet)]
pub struct TransferInit {
    /// Destination path, relative to the server's root unless absolute.
    pub local_path: String,
    pub total_bytes: u64,
    /// Unix permission bits for the created file.
    pub perm: u32,
}

/// Directory listing returned by a fetch of a folder.
#[derive(Debug, Clone, PartialEq, Facet)]
pub struct FolderInfo {
    pub perm: u32,
    pub contents: Vec<String>,
}

impl TransferInit {
    pub fn encode(&self) -> Result<String, TransferError> {
        facet_json::to_string(self).map_err(|e| TransferError::Codec {
            message: format!("encoding transfer request: {e}"),
        })
    }

    pub fn decode(body: &str) -> Result<Self, TransferError> {
        facet_json::from_str(body).map_err(|e| TransferError::Codec {
            message: format!("decoding transfer request: {e}"),
        })
    }
}

impl FolderInfo {
    pub fn encode(&self) -> Result<String, TransferError> {
        facet_json::to_string(self).map_err(|e| TransferError::Codec {
            message: format!("encoding folder listing: {e}"),
        })
    }

    pub fn decode(body: &str) -> Result<Self, TransferError> {
        facet_json::from_str(body).map_err(|e| TransferError::Codec {
            message: format!("decoding folder listing: {e}"),
        })
    }
}

/// Format permission bits the way the `Perm` header carries them (decimal).
pub fn format_perm(perm: u32) -> String {
    perm.to_string()
}

pub fn parse_perm(value: &str) -> Result<u32, TransferError> {
    value.trim().parse().map_err(|_| TransferError::Protocol {
        message: format!("invalid permission header: {value:?}"),
    })
}

/// Parse an `Is-Folder` header value.
pub fn parse_is_folder(value: &str) -> Result<bool, TransferError> {
    match value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(TransferError::Protocol {
            message: format!("invalid {IS_FOLDER_HEADER} header: {other:?}"),
        }),
    }
}
