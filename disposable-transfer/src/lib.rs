//! Chunked file transfer between an operator machine and a disposable droplet.
//!
//! The server half runs inside the `disposable up` process and is reached from
//! the droplet through a reverse tunnel. The client half backs the `copyback`
//! and `copyfrom` executables installed on the droplet.

pub mod client;
pub mod codec;
pub mod error;
pub mod server;

pub use client::{PullReport, PushReport, TransferClient};
pub use codec::{FolderInfo, TransferInit};
pub use error::TransferError;
pub use server::TransferState;
