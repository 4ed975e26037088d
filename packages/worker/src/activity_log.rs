use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::warn;

/// Appends worker activity in the canonical pipe-delimited format the API
/// metrics collector parses:
///
/// `2026-01-30 10:15:23 | INFO | worker | [SBS] Recibido job: SOL-001`
///
/// Writes are best-effort; a failing log file never fails a job.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!(path = %parent.display(), error = %e, "No se pudo crear el directorio de logs");
        }
        Self { path }
    }

    pub fn job_received(&self, vendor: &str, job_id: &str) {
        self.write(
            "INFO",
            &format!("[{}] Recibido job: {}", vendor.to_uppercase(), job_id),
        );
    }

    pub fn job_completed(&self, vendor: &str, job_id: &str) {
        self.write(
            "INFO",
            &format!(
                "[{}] Job {} completado exitosamente",
                vendor.to_uppercase(),
                job_id
            ),
        );
    }

    pub fn job_failed(&self, vendor: &str, job_id: &str) {
        self.write(
            "INFO",
            &format!(
                "[{}] Job {} completado con errores",
                vendor.to_uppercase(),
                job_id
            ),
        );
    }

    /// ERROR-level line carrying a machine code, counted by the metrics
    /// error breakdown.
    pub fn job_error(&self, vendor: &str, job_id: &str, error_code: &str) {
        self.write(
            "ERROR",
            &format!(
                "[{}] Job {} falló: {}",
                vendor.to_uppercase(),
                job_id,
                error_code
            ),
        );
    }

    fn write(&self, level: &str, message: &str) {
        let line = format!(
            "{} | {} | worker | {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level,
            message
        );
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "No se pudo escribir el log de actividad");
        }
    }
}
