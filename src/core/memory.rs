//! System memory probing for cache budgets.
//!
//! **Why**: A fixed gigabyte budget is wrong on both small laptops and large
//! workstations. The driver can derive the cache budget from available RAM.
//!
//! **Used by**: `CacheOptions::from_system_memory`

use log::info;
use sysinfo::System;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Snapshot of host memory (bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total: u64,
    pub available: u64,
}

impl MemorySnapshot {
    pub fn probe() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            total: sys.total_memory(),
            available: sys.available_memory(),
        }
    }

    /// Usable budget in GiB
    ///
    /// # Arguments
    ///
    /// * `fraction` - Fraction of available memory (0.0-1.0, e.g. 0.5 = 50%)
    /// * `reserve_gb` - Memory kept for the system (GiB, e.g. 2.0)
    pub fn budget_gb(&self, fraction: f64, reserve_gb: f64) -> f64 {
        let reserve = (reserve_gb.max(0.0) * GIB) as u64;
        let usable = self.available.saturating_sub(reserve);
        usable as f64 * fraction.clamp(0.0, 1.0) / GIB
    }
}

/// Probe the host and return a budget in GiB.
pub fn system_budget_gb(fraction: f64, reserve_gb: f64) -> f64 {
    let snapshot = MemorySnapshot::probe();
    let budget = snapshot.budget_gb(fraction, reserve_gb);
    info!(
        "Memory: available={} MB, reserve={} MB, budget={:.2} GB ({}%)",
        snapshot.available / 1024 / 1024,
        (reserve_gb * 1024.0) as u64,
        budget,
        (fraction * 100.0) as u32
    );
    budget
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_respects_reserve() {
        let snapshot = MemorySnapshot {
            total: 16 * GIB as u64,
            available: 10 * GIB as u64,
        };
        assert!((snapshot.budget_gb(0.5, 2.0) - 4.0).abs() < 1e-9);
        assert_eq!(snapshot.budget_gb(0.5, 20.0), 0.0);
        assert!((snapshot.budget_gb(2.0, 0.0) - 10.0).abs() < 1e-9);
    }
}
