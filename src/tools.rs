//! Droplet-side transfer executables.
//!
//! `copyback` and `copyfrom` are read from a local directory when `up`
//! starts and written to the droplet over SSH right after the bootstrap
//! command, so the tunnel is usable on a stock image.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Executables installed on every droplet.
pub const TOOL_NAMES: [&str; 2] = ["copyback", "copyfrom"];

/// Where the executables land on the droplet.
pub const INSTALL_DIR: &str = "/usr/local/bin";

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EM_X86_64: u16 = 0x3e;

/// One executable ready for upload.
#[derive(Clone)]
pub struct TransferTool {
    pub name: &'static str,
    pub binary: Arc<[u8]>,
}

impl fmt::Debug for TransferTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferTool")
            .field("name", &self.name)
            .field("bytes", &self.binary.len())
            .finish()
    }
}

impl TransferTool {
    /// Shell command that stores stdin as this tool. Writes go to a hidden
    /// temporary name first so a half-written upload never replaces a good
    /// binary; running it again simply reinstalls.
    pub fn install_command(&self) -> String {
        let target = format!("{INSTALL_DIR}/{}", self.name);
        let partial = format!("{INSTALL_DIR}/.{}.part", self.name);
        format!(
            "mkdir -p {INSTALL_DIR} && cat > {partial} && chmod 755 {partial} && mv -f {partial} {target}"
        )
    }
}

/// Directory holding the running executable; cargo puts the transfer
/// binaries next to it.
pub fn default_tools_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Read every tool found in `dir` that can run on an x86_64 Linux droplet.
/// Missing or foreign binaries are skipped with a warning.
pub fn load_transfer_tools(dir: &Path) -> Vec<TransferTool> {
    let mut tools = Vec::new();
    for name in TOOL_NAMES {
        let path = dir.join(name);
        match std::fs::read(&path) {
            Ok(binary) if runs_on_droplet(&binary) => {
                tracing::debug!(path = %path.display(), bytes = binary.len(), "transfer tool found");
                tools.push(TransferTool {
                    name,
                    binary: binary.into(),
                });
            }
            Ok(_) => {
                tracing::warn!(path = %path.display(), "not an x86_64 Linux executable, not uploading");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "transfer tool unavailable");
            }
        }
    }
    tools
}

/// 64-bit little-endian x86_64 ELF, the architecture of every droplet size.
fn runs_on_droplet(binary: &[u8]) -> bool {
    binary.len() >= 20
        && &binary[..4] == ELF_MAGIC
        && binary[4] == ELFCLASS64
        && binary[5] == ELFDATA2LSB
        && u16::from_le_bytes([binary[18], binary[19]]) == EM_X86_64
}
