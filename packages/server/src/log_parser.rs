use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{Local, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use tracing::warn;

// Line format: `2026-01-30 10:15:23 | INFO | worker | [SBS] Recibido job: SOL-001`
static LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\s*\|\s*(\w+)\s*\|\s*\S+\s*\|\s*(.+)$")
        .expect("log line regex")
});

static JOB_RECEIVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\w+)\] Recibido job:\s+(\S+)").expect("received regex"));

static JOB_COMPLETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\w+)\] Job (\S+) completado exitosamente").expect("completed regex")
});

static JOB_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\w+)\] Job (\S+) completado con errores").expect("failed regex")
});

static ERROR_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z_]+_\d{3})\b").expect("error code regex"));

/// Per-vendor job counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VendorActivity {
    pub received: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Aggregated job activity over one time window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivitySummary {
    pub jobs_received: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    /// completed / (completed + failed), in percent.
    pub success_rate: f64,
    pub by_vendor: HashMap<String, VendorActivity>,
}

/// Extracts activity and error counters from the canonical worker log.
///
/// Brittle by nature; every failure degrades to empty counters instead of
/// surfacing an error to `/metrics`.
#[derive(Debug, Clone)]
pub struct LogParser {
    log_path: PathBuf,
}

impl LogParser {
    pub fn new(log_path: impl AsRef<Path>) -> Self {
        Self {
            log_path: log_path.as_ref().to_path_buf(),
        }
    }

    /// Job activity within the last `hours`.
    pub fn parse_activity(&self, hours: i64) -> ActivitySummary {
        let Some(lines) = self.read_lines() else {
            return ActivitySummary::default();
        };
        let cutoff = Local::now().naive_local() - chrono::Duration::hours(hours);

        let mut summary = ActivitySummary::default();
        for line in lines.lines() {
            let Some((timestamp, _level, message)) = parse_line(line) else {
                continue;
            };
            if timestamp < cutoff {
                continue;
            }

            if let Some(caps) = JOB_RECEIVED.captures(message) {
                let vendor = caps[1].to_lowercase();
                summary.jobs_received += 1;
                summary.by_vendor.entry(vendor).or_default().received += 1;
            } else if let Some(caps) = JOB_COMPLETED.captures(message) {
                let vendor = caps[1].to_lowercase();
                summary.jobs_completed += 1;
                summary.by_vendor.entry(vendor).or_default().completed += 1;
            } else if let Some(caps) = JOB_FAILED.captures(message) {
                let vendor = caps[1].to_lowercase();
                summary.jobs_failed += 1;
                summary.by_vendor.entry(vendor).or_default().failed += 1;
            }
        }

        let finished = summary.jobs_completed + summary.jobs_failed;
        if finished > 0 {
            summary.success_rate =
                (summary.jobs_completed as f64 / finished as f64 * 100.0 * 100.0).round() / 100.0;
        }
        summary
    }

    /// Counts of machine error codes (`XYZ_001` form) on ERROR-level lines
    /// within the last `hours`.
    pub fn parse_errors(&self, hours: i64) -> HashMap<String, u64> {
        let Some(lines) = self.read_lines() else {
            return HashMap::new();
        };
        let cutoff = Local::now().naive_local() - chrono::Duration::hours(hours);

        let mut counts: HashMap<String, u64> = HashMap::new();
        for line in lines.lines() {
            let Some((timestamp, level, message)) = parse_line(line) else {
                continue;
            };
            if level != "ERROR" || timestamp < cutoff {
                continue;
            }
            if let Some(caps) = ERROR_CODE.captures(message) {
                *counts.entry(caps[1].to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    fn read_lines(&self) -> Option<String> {
        match std::fs::read_to_string(&self.log_path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.log_path.display(), "Log de workers no encontrado");
                None
            }
            Err(e) => {
                warn!(path = %self.log_path.display(), error = %e, "Error leyendo log de workers");
                None
            }
        }
    }
}

fn parse_line(line: &str) -> Option<(NaiveDateTime, &str, &str)> {
    let caps = LOG_LINE.captures(line)?;
    let timestamp =
        NaiveDateTime::parse_from_str(caps.get(1)?.as_str(), "%Y-%m-%d %H:%M:%S").ok()?;
    Some((
        timestamp,
        caps.get(2)?.as_str(),
        caps.get(3)?.as_str(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn stamp(offset_hours: i64) -> String {
        (Local::now() - chrono::Duration::hours(offset_hours))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    fn write_log(lines: &[String]) -> (tempfile::TempDir, LogParser) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.log");
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        let parser = LogParser::new(&path);
        (dir, parser)
    }

    #[test]
    fn test_activity_counts_and_success_rate() {
        let now = stamp(0);
        let (_dir, parser) = write_log(&[
            format!("{now} | INFO | worker | [HDI] Recibido job: j1"),
            format!("{now} | INFO | worker | [HDI] Job j1 completado exitosamente"),
            format!("{now} | INFO | worker | [SBS] Recibido job: j2"),
            format!("{now} | INFO | worker | [SBS] Job j2 completado con errores"),
            format!("{now} | INFO | worker | [HDI] Recibido job: j3"),
            format!("{now} | INFO | worker | [HDI] Job j3 completado exitosamente"),
        ]);

        let summary = parser.parse_activity(24);
        assert_eq!(summary.jobs_received, 3);
        assert_eq!(summary.jobs_completed, 2);
        assert_eq!(summary.jobs_failed, 1);
        assert!((summary.success_rate - 66.67).abs() < 0.01);

        let hdi = summary.by_vendor.get("hdi").unwrap();
        assert_eq!(hdi.received, 2);
        assert_eq!(hdi.completed, 2);
        assert_eq!(hdi.failed, 0);
    }

    #[test]
    fn test_old_lines_fall_outside_window() {
        let old = stamp(30);
        let now = stamp(0);
        let (_dir, parser) = write_log(&[
            format!("{old} | INFO | worker | [HDI] Recibido job: j1"),
            format!("{now} | INFO | worker | [HDI] Recibido job: j2"),
        ]);

        let summary = parser.parse_activity(24);
        assert_eq!(summary.jobs_received, 1);
    }

    #[test]
    fn test_error_codes_counted_on_error_lines_only() {
        let now = stamp(0);
        let (_dir, parser) = write_log(&[
            format!("{now} | ERROR | worker | [HDI] Job j1 falló: CAPTCHA_001"),
            format!("{now} | ERROR | worker | [HDI] Job j2 falló: CAPTCHA_001"),
            format!("{now} | ERROR | worker | [SBS] Job j3 falló: AUTH_001"),
            // INFO lines never count, even when they carry a code.
            format!("{now} | INFO | worker | reintentando tras CAPTCHA_001"),
        ]);

        let errors = parser.parse_errors(24);
        assert_eq!(errors.get("CAPTCHA_001"), Some(&2));
        assert_eq!(errors.get("AUTH_001"), Some(&1));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_missing_file_degrades_to_empty() {
        let parser = LogParser::new("/nonexistent/worker.log");
        let summary = parser.parse_activity(24);
        assert_eq!(summary.jobs_received, 0);
        assert!(parser.parse_errors(24).is_empty());
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let now = stamp(0);
        let (_dir, parser) = write_log(&[
            "not a log line at all".to_string(),
            format!("{now} | INFO | worker | [HDI] Recibido job: j1"),
        ]);
        assert_eq!(parser.parse_activity(24).jobs_received, 1);
    }
}
