use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

/// Shared counters updated by verification workers.
///
/// Cloning shares the same counters. Core calls only bump them; the periodic
/// reporter is started by the binary.
#[derive(Clone, Debug)]
pub struct Progress {
    enabled: bool,
    pub stage: Arc<Mutex<String>>,
    pub entries_done: Arc<AtomicU64>,
    pub entries_total: Arc<AtomicU64>,
    pub bytes_done: Arc<AtomicU64>,
    pub bytes_total: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stage: Arc::new(Mutex::new(String::new())),
            entries_done: Arc::new(AtomicU64::new(0)),
            entries_total: Arc::new(AtomicU64::new(0)),
            bytes_done: Arc::new(AtomicU64::new(0)),
            bytes_total: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_stage(&self, s: &str) {
        if !self.enabled {
            return;
        }
        if let Ok(mut stage) = self.stage.lock() {
            *stage = s.to_string();
        }
    }

    /// Reset for a new archive of `entries` entries holding `bytes` uncompressed bytes.
    pub fn begin(&self, entries: u64, bytes: u64) {
        self.entries_total.store(entries, Ordering::Relaxed);
        self.entries_done.store(0, Ordering::Relaxed);
        self.bytes_total.store(bytes, Ordering::Relaxed);
        self.bytes_done.store(0, Ordering::Relaxed);
    }

    pub fn inc_entry(&self) {
        self.entries_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.entries_done.load(Ordering::Relaxed),
            self.entries_total.load(Ordering::Relaxed),
            self.bytes_done.load(Ordering::Relaxed),
            self.bytes_total.load(Ordering::Relaxed),
        )
    }

    /// Spawn a thread that logs the counters every `every` until [`stop`](Self::stop).
    pub fn start(&self, every: Duration) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let this = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while this.running.load(Ordering::Relaxed) {
                thread::sleep(every);
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                let stage = this.stage.lock().map(|s| s.clone()).unwrap_or_default();
                let (ed, et, bd, bt) = this.snapshot();
                let pct = if bt > 0 { (bd as f64 / bt as f64) * 100.0 } else { 0.0 };
                tracing::info!(
                    elapsed_s = t0.elapsed().as_secs(),
                    stage = %stage,
                    entries_done = ed,
                    entries_total = et,
                    bytes_pct = pct as i32,
                    "progress"
                );
            }
        });
    }

    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}
