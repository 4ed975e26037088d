use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

/// Retention for per-execution bot logs and screenshots.
const LOG_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
/// Retention for temporary PDF downloads.
const PDF_RETENTION: Duration = Duration::from_secs(60 * 60);
/// How often the janitor sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Prunes on-disk artifacts the bots leave behind.
///
/// Per-execution directories under `logs/bots/<vendor>/<job_id>/` are kept
/// for at least 24 hours; downloads under `temp/pdfs/` for one hour. Errors
/// never escalate; a sweep that cannot delete simply retries next round.
#[derive(Debug, Clone)]
pub struct Janitor {
    bot_logs_dir: PathBuf,
    pdfs_dir: PathBuf,
}

impl Janitor {
    pub fn new(bot_logs_dir: impl AsRef<Path>, pdfs_dir: impl AsRef<Path>) -> Self {
        Self {
            bot_logs_dir: bot_logs_dir.as_ref().to_path_buf(),
            pdfs_dir: pdfs_dir.as_ref().to_path_buf(),
        }
    }

    /// Spawn the periodic sweep task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                self.sweep();
            }
        })
    }

    /// One sweep over both trees. Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        removed += prune_job_dirs(&self.bot_logs_dir, LOG_RETENTION);
        removed += prune_files(&self.pdfs_dir, PDF_RETENTION);
        if removed > 0 {
            info!(removed, "Limpieza de artefactos completada");
        }
        removed
    }
}

/// Remove `<vendor>/<job_id>` directories whose newest content is older than
/// the retention window.
fn prune_job_dirs(root: &Path, retention: Duration) -> usize {
    let mut removed = 0;
    for vendor_dir in read_dirs(root) {
        for job_dir in read_dirs(&vendor_dir) {
            if !newer_than(&job_dir, retention) {
                match std::fs::remove_dir_all(&job_dir) {
                    Ok(()) => {
                        debug!(path = %job_dir.display(), "Directorio de ejecución eliminado");
                        removed += 1;
                    }
                    Err(e) => {
                        warn!(path = %job_dir.display(), error = %e, "No se pudo eliminar directorio");
                    }
                }
            }
        }
    }
    removed
}

/// Remove plain files older than the retention window.
fn prune_files(root: &Path, retention: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && is_older_than(&path, retention) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "No se pudo eliminar archivo");
                }
            }
        }
    }
    removed
}

fn read_dirs(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect()
}

/// True when the directory or any file inside it is younger than `retention`.
fn newer_than(dir: &Path, retention: Duration) -> bool {
    if !is_older_than(dir, retention) {
        return true;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries
        .flatten()
        .any(|entry| !is_older_than(&entry.path(), retention))
}

fn is_older_than(path: &Path, retention: Duration) -> bool {
    let modified = std::fs::metadata(path).and_then(|meta| meta.modified());
    match modified {
        Ok(modified) => match SystemTime::now().duration_since(modified) {
            Ok(age) => age > retention,
            // Future mtimes (clock skew) count as fresh.
            Err(_) => false,
        },
        Err(_) => false,
    }
}
