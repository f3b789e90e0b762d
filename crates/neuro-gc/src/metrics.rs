//! Collection cycle statistics.
//!
//! The collector records one [`CycleStats`] per completed cycle, readable
//! through [`Collector::last_cycle_stats`](crate::gc::Collector::last_cycle_stats).
//! This is library-internal observability; no external sink is installed.

use std::time::Duration;

/// Statistics of one completed collection cycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct CycleStats {
    /// Sequence number of the cycle, starting at 1.
    pub cycle: u64,
    /// Live handles enumerated at the start of the scan phase.
    pub scanned: usize,
    /// Allocations found unreachable and swept this cycle.
    pub reclaimed: usize,
    /// Total bytes (headers included) of reclaimed allocations.
    pub reclaimed_bytes: usize,
    /// Live allocations relocated by the compact phase.
    pub relocated: usize,
    /// Wall time of the scan phase.
    pub scan_time: Duration,
    /// Wall time of the sweep phase. Zero when no garbage was found.
    pub sweep_time: Duration,
    /// Wall time of the compact phase. Zero when no garbage was found.
    pub compact_time: Duration,
}
