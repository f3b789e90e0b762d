//! Shared test scaffolding.
//!
//! The collector is a process-wide singleton, so tests within one binary
//! serialize on a lock and drive cycles explicitly through `collect_now`
//! (the configured interval is long enough to never fire on its own).

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use neuro_gc::CollectorConfig;

static SESSION_LOCK: Mutex<()> = Mutex::new(());

/// A live collector scoped to one test. Tears the collector down on drop.
pub struct GcSession {
    _guard: MutexGuard<'static, ()>,
}

/// Initializes the collector for one test, serializing against the other
/// tests of this binary.
pub fn session() -> GcSession {
    let guard = SESSION_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    neuro_gc::init_with_config(CollectorConfig {
        scan_interval: Duration::from_secs(3600),
        ..CollectorConfig::default()
    })
    .expect("collector initializes");
    GcSession { _guard: guard }
}

impl Drop for GcSession {
    fn drop(&mut self) {
        let _ = neuro_gc::destroy();
    }
}

/// Runs one full collection cycle synchronously.
pub fn collect() {
    neuro_gc::Collector::instance()
        .expect("collector is live")
        .collect_now();
}
