use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Where vendor profiles live relative to the worker's working directory.
pub const DEFAULT_PROFILES_DIR: &str = "temp/profiles";

/// Default bound on waiting for a vendor's cookie lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

struct SaveRequest {
    cookies: Value,
    done: oneshot::Sender<std::io::Result<()>>,
}

/// Per-vendor cookie jars persisted under `<base>/<vendor>/cookies.json`.
///
/// Writes are serialized through a single writer task per vendor, fed over a
/// channel, so concurrent handlers can never interleave partial writes. A
/// sibling `cookies.lock` marks a writer in progress for external tooling;
/// waiting for it is bounded, after which the write proceeds best-effort.
/// Reads take a snapshot of the last fully-written file.
pub struct CookieStore {
    base_dir: PathBuf,
    lock_timeout: Duration,
    writers: Mutex<HashMap<String, mpsc::Sender<SaveRequest>>>,
}

impl CookieStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            lock_timeout: LOCK_TIMEOUT,
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Shorter lock bound, for tests.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn vendor_dir(&self, vendor: &str) -> PathBuf {
        self.base_dir.join(vendor)
    }

    /// Snapshot of the vendor's cookie jar, `None` when absent or unreadable.
    pub fn load(&self, vendor: &str) -> Option<Value> {
        let path = self.vendor_dir(vendor).join("cookies.json");
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(vendor = %vendor, error = %e, "Cookies corruptas, ignoradas");
                None
            }
        }
    }

    /// Persist the vendor's cookie jar through its single writer task.
    pub async fn save(&self, vendor: &str, cookies: Value) -> std::io::Result<()> {
        let sender = self.writer_for(vendor);
        let (done_tx, done_rx) = oneshot::channel();
        sender
            .send(SaveRequest {
                cookies,
                done: done_tx,
            })
            .await
            .map_err(|_| std::io::Error::other("cookie writer task terminated"))?;
        done_rx
            .await
            .map_err(|_| std::io::Error::other("cookie writer dropped the request"))?
    }

    fn writer_for(&self, vendor: &str) -> mpsc::Sender<SaveRequest> {
        let mut writers = self.writers.lock().expect("cookie writers lock");
        if let Some(sender) = writers.get(vendor)
            && !sender.is_closed()
        {
            return sender.clone();
        }

        let (tx, rx) = mpsc::channel::<SaveRequest>(16);
        let dir = self.vendor_dir(vendor);
        let vendor_name = vendor.to_string();
        let lock_timeout = self.lock_timeout;
        tokio::spawn(writer_loop(dir, vendor_name, lock_timeout, rx));
        writers.insert(vendor.to_string(), tx.clone());
        tx
    }
}

/// Single writer for one vendor: drains save requests in order, each one
/// guarded by the lock file and written atomically (temp file + rename).
async fn writer_loop(
    dir: PathBuf,
    vendor: String,
    lock_timeout: Duration,
    mut rx: mpsc::Receiver<SaveRequest>,
) {
    while let Some(request) = rx.recv().await {
        let result = write_jar(&dir, &vendor, lock_timeout, &request.cookies).await;
        let _ = request.done.send(result);
    }
}

async fn write_jar(
    dir: &Path,
    vendor: &str,
    lock_timeout: Duration,
    cookies: &Value,
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let lock_path = dir.join("cookies.lock");

    let lock_acquired = acquire_lock(&lock_path, lock_timeout).await;
    if !lock_acquired {
        warn!(
            vendor = %vendor,
            timeout_s = lock_timeout.as_secs(),
            "Timeout esperando cookies.lock, escribiendo de todos modos"
        );
    }

    let result = (|| {
        let tmp_path = dir.join("cookies.json.tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(cookies)?)?;
        std::fs::rename(&tmp_path, dir.join("cookies.json"))
    })();

    if lock_acquired && let Err(e) = std::fs::remove_file(&lock_path) {
        warn!(vendor = %vendor, error = %e, "No se pudo eliminar cookies.lock");
    }

    debug!(vendor = %vendor, "Cookies guardadas");
    result
}

/// Try to create the lock file exclusively, polling until the bound elapses.
async fn acquire_lock(lock_path: &Path, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(_) => return true,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if tokio::time::Instant::now() >= deadline {
                    return false;
                }
                tokio::time::sleep(LOCK_POLL_INTERVAL).await;
            }
            Err(_) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CookieStore::new(dir.path());

        let cookies = json!([{"name": "session", "value": "abc", "domain": ".hdi.com.co"}]);
        store.save("hdi", cookies.clone()).await.unwrap();

        assert_eq!(store.load("hdi").unwrap(), cookies);
        // The lock is released after the write.
        assert!(!dir.path().join("hdi/cookies.lock").exists());
    }

    #[tokio::test]
    async fn test_load_missing_jar_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CookieStore::new(dir.path());
        assert!(store.load("sura").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_jar_is_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("axa")).unwrap();
        std::fs::write(dir.path().join("axa/cookies.json"), b"{broken").unwrap();

        let store = CookieStore::new(dir.path());
        assert!(store.load("axa").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_valid_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(CookieStore::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.save("hdi", json!({"round": i})).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = store.load("hdi").unwrap();
        assert!(snapshot.get("round").is_some());
    }

    #[tokio::test]
    async fn test_stale_lock_times_out_and_writes_anyway() {
        let dir = tempfile::tempdir().unwrap();
        let vendor_dir = dir.path().join("sbs");
        std::fs::create_dir_all(&vendor_dir).unwrap();
        // A lock nobody will ever release.
        std::fs::write(vendor_dir.join("cookies.lock"), b"").unwrap();

        let store = CookieStore::new(dir.path()).with_lock_timeout(Duration::from_millis(50));
        store.save("sbs", json!({"k": "v"})).await.unwrap();
        assert_eq!(store.load("sbs").unwrap(), json!({"k": "v"}));
        // The foreign lock is left in place.
        assert!(vendor_dir.join("cookies.lock").exists());
    }
}
