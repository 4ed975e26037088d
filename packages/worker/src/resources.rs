use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use sysinfo::System;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Window for the fast CPU sample taken on each admission check.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(100);

/// Raised when a job cannot be admitted. The caller must NOT acknowledge the
/// message, so the broker redelivers it to this or another worker.
#[derive(Debug, Error)]
#[error("Recursos no disponibles: {0}")]
pub struct ResourceUnavailable(pub String);

#[derive(Default, Debug)]
struct ActiveState {
    count: usize,
    jobs: HashMap<String, String>,
}

/// Snapshot of admission state and host resources.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStats {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub memory_available_mb: u64,
    pub active: usize,
    pub available_slots: usize,
    pub max_concurrent: usize,
    pub active_jobs: HashMap<String, String>,
}

/// Bounds concurrent handler executions by slot count and host CPU/RAM.
///
/// One instance per worker process. Admission takes a slot from the
/// semaphore only after the host checks pass; the returned guard gives the
/// slot back on every exit path.
pub struct ResourceController {
    max_concurrent: usize,
    max_cpu_pct: f32,
    max_mem_pct: f32,
    semaphore: Arc<Semaphore>,
    active: Arc<Mutex<ActiveState>>,
    system: tokio::sync::Mutex<System>,
}

impl ResourceController {
    pub fn new(max_concurrent: usize, max_cpu_pct: f32, max_mem_pct: f32) -> Self {
        info!(
            max_concurrent,
            max_cpu_pct, max_mem_pct, "ResourceController inicializado"
        );
        Self {
            max_concurrent,
            max_cpu_pct,
            max_mem_pct,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            active: Arc::new(Mutex::new(ActiveState::default())),
            system: tokio::sync::Mutex::new(System::new()),
        }
    }

    /// Check slot, CPU and memory headroom without taking a slot.
    pub async fn check_resources(&self) -> Result<(), ResourceUnavailable> {
        let active = self.active.lock().expect("active state lock").count;
        if active >= self.max_concurrent {
            return Err(ResourceUnavailable(format!(
                "Sin slots disponibles ({}/{})",
                active, self.max_concurrent
            )));
        }

        let (cpu, memory) = self.sample().await;
        if cpu > self.max_cpu_pct {
            return Err(ResourceUnavailable(format!(
                "CPU al {:.1}% (máx: {}%)",
                cpu, self.max_cpu_pct
            )));
        }
        if memory > self.max_mem_pct {
            return Err(ResourceUnavailable(format!(
                "RAM al {:.1}% (máx: {}%)",
                memory, self.max_mem_pct
            )));
        }
        Ok(())
    }

    /// Admit one job: verify headroom, take a slot, record the job.
    ///
    /// The guard releases the slot and unregisters the job when dropped.
    pub async fn acquire(&self, vendor: &str, job_id: &str) -> Result<SlotGuard, ResourceUnavailable> {
        self.check_resources().await.map_err(|e| {
            warn!(vendor = %vendor, job_id = %job_id, reason = %e.0, "Recursos no disponibles");
            e
        })?;

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ResourceUnavailable("semáforo cerrado".into()))?;

        let active_now = {
            let mut state = self.active.lock().expect("active state lock");
            state.count += 1;
            state.jobs.insert(job_id.to_string(), vendor.to_string());
            state.count
        };
        info!(
            vendor = %vendor,
            job_id = %job_id,
            active = active_now,
            max = self.max_concurrent,
            "Slot adquirido"
        );

        Ok(SlotGuard {
            _permit: permit,
            active: Arc::clone(&self.active),
            vendor: vendor.to_string(),
            job_id: job_id.to_string(),
            max_concurrent: self.max_concurrent,
        })
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().expect("active state lock").count
    }

    pub fn available_slots(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.active_count())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Host and admission snapshot for observability.
    pub async fn stats(&self) -> ResourceStats {
        let (cpu, memory) = self.sample().await;
        let available_mb = {
            let sys = self.system.lock().await;
            sys.available_memory() / (1024 * 1024)
        };
        let (active, jobs) = {
            let state = self.active.lock().expect("active state lock");
            (state.count, state.jobs.clone())
        };
        ResourceStats {
            cpu_percent: cpu,
            memory_percent: memory,
            memory_available_mb: available_mb,
            active,
            available_slots: self.max_concurrent.saturating_sub(active),
            max_concurrent: self.max_concurrent,
            active_jobs: jobs,
        }
    }

    /// Fast CPU sample over a 100 ms window plus a memory refresh.
    async fn sample(&self) -> (f32, f32) {
        let mut sys = self.system.lock().await;
        sys.refresh_cpu_usage();
        tokio::time::sleep(CPU_SAMPLE_WINDOW).await;
        sys.refresh_cpu_usage();
        let cpu = sys.global_cpu_usage();

        sys.refresh_memory();
        let total = sys.total_memory();
        let memory = if total > 0 {
            sys.used_memory() as f32 / total as f32 * 100.0
        } else {
            0.0
        };
        (cpu, memory)
    }
}

/// Scoped admission token for one running handler.
#[derive(Debug)]
pub struct SlotGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
    active: Arc<Mutex<ActiveState>>,
    vendor: String,
    job_id: String,
    max_concurrent: usize,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let active_now = {
            let mut state = self.active.lock().expect("active state lock");
            state.count = state.count.saturating_sub(1);
            state.jobs.remove(&self.job_id);
            state.count
        };
        info!(
            vendor = %self.vendor,
            job_id = %self.job_id,
            active = active_now,
            max = self.max_concurrent,
            "Slot liberado"
        );
    }
}
