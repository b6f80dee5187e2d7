use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tracing_subscriber::fmt::MakeWriter;

/// How many `up` session logs to keep around.
pub const KEEP_SESSION_LOGS: usize = 20;

// ── DeferredFileWriter ───────────────────────────────────

type Slot = Arc<Mutex<Option<File>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<File>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A `MakeWriter` that drops everything until a file is attached through
/// its [`DeferredFileHandle`].
///
/// The subscriber is installed before we know whether the command runs a
/// session, so the session log is switched on afterwards.
#[derive(Clone)]
pub struct DeferredFileWriter {
    slot: Slot,
}

#[derive(Clone)]
pub struct DeferredFileHandle {
    slot: Slot,
}

impl DeferredFileWriter {
    pub fn new() -> (Self, DeferredFileHandle) {
        let slot: Slot = Arc::new(Mutex::new(None));
        (Self { slot: slot.clone() }, DeferredFileHandle { slot })
    }
}

impl DeferredFileHandle {
    /// Start appending to `path`, creating parent directories as needed.
    pub fn set_file(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *lock(&self.slot) = Some(file);
        Ok(())
    }
}

pub struct DeferredWriter {
    slot: Slot,
}

impl std::io::Write for DeferredWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match lock(&self.slot).as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match lock(&self.slot).as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DeferredFileWriter {
    type Writer = DeferredWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DeferredWriter {
            slot: self.slot.clone(),
        }
    }
}

// ── Session logs ─────────────────────────────────────────

/// Fresh log path for one `up` invocation: `<logs_dir>/<timestamp>_up.log`.
pub fn session_log_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join(format!("{}_up.log", utc_timestamp()))
}

/// Delete the oldest session logs, keeping at most `keep`.
pub fn rotate_session_logs(logs_dir: &Path, keep: usize) {
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return;
    };

    let mut logs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|f| f.to_str())
                .is_some_and(|f| f.ends_with("_up.log"))
        })
        .collect();

    // Timestamp prefixes sort chronologically.
    logs.sort();
    let excess = logs.len().saturating_sub(keep);
    for old in &logs[..excess] {
        let _ = fs::remove_file(old);
    }
}

/// UTC wall-clock time as `YYYY-MM-DDTHH-MM-SS`, safe for file names.
pub fn utc_timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_timestamp(secs)
}

fn format_timestamp(secs: u64) -> String {
    let (hh, mm, ss) = ((secs % 86_400) / 3600, (secs % 3600) / 60, secs % 60);

    // Days since epoch to a proleptic Gregorian date.
    let shifted = (secs / 86_400) as i64 + 719_468;
    let era = shifted.div_euclid(146_097);
    let day_of_era = shifted.rem_euclid(146_097);
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let month_index = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * month_index + 2) / 5 + 1;
    let month = if month_index < 10 { month_index + 3 } else { month_index - 9 };
    let year = year_of_era + era * 400 + i64::from(month <= 2);

    format!("{year:04}-{month:02}-{day:02}T{hh:02}-{mm:02}-{ss:02}")
}
