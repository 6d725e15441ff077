//! Memory telemetry and the pre-encode safety gate.
//!
//! The encode stage holds the scaled raster plus up to two encoded streams,
//! so before committing to it the pipeline estimates the transient peak as
//! `raw_bytes * peak_multiplier` and requires it to stay under
//! `available * headroom_factor`.
//!
//! Telemetry comes from a [`MemoryInfoProvider`]. [`SystemMemory`] reads the
//! host (or its cgroup limit when running in a container) through `sysinfo`;
//! [`FixedMemory`] returns a constant snapshot for tests and for callers that
//! budget memory themselves.
//!
//! The gate reads point-in-time numbers and reserves nothing. Concurrent
//! invocations can each pass the gate and together exceed the estimate.

use crate::imaging::{RasterBuffer, estimate_peak_bytes};
use serde::Serialize;
use sysinfo::System;
use thiserror::Error;

/// Point-in-time memory figures in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub max_allowed: u64,
    pub used: u64,
}

impl MemorySnapshot {
    /// `max_allowed - used`, floored at zero.
    pub fn available(&self) -> u64 {
        self.max_allowed.saturating_sub(self.used)
    }
}

/// Source of memory telemetry for the gate.
pub trait MemoryInfoProvider: Sync {
    fn snapshot(&self) -> MemorySnapshot;
}

/// Live host memory via `sysinfo`, preferring cgroup limits when present.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryInfoProvider for SystemMemory {
    fn snapshot(&self) -> MemorySnapshot {
        let mut system = System::new();
        system.refresh_memory();
        if let Some(limits) = system.cgroup_limits() {
            return MemorySnapshot {
                max_allowed: limits.total_memory,
                used: limits.total_memory.saturating_sub(limits.free_memory),
            };
        }
        MemorySnapshot {
            max_allowed: system.total_memory(),
            used: system.used_memory(),
        }
    }
}

/// A constant snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedMemory(pub MemorySnapshot);

impl FixedMemory {
    /// `available` bytes free out of an arbitrary larger total.
    pub fn available(available: u64) -> Self {
        Self(MemorySnapshot {
            max_allowed: available,
            used: 0,
        })
    }
}

impl MemoryInfoProvider for FixedMemory {
    fn snapshot(&self) -> MemorySnapshot {
        self.0
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error(
    "estimated peak of {estimated} bytes is not below the {allowed} bytes allowed ({available} available)"
)]
pub struct MemorySafetyError {
    pub estimated: u64,
    pub allowed: u64,
    pub available: u64,
}

/// What the gate saw when it let a raster through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateReport {
    pub estimated: u64,
    pub allowed: u64,
}

/// Pass/fail check run between scaling and encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryGate {
    pub peak_multiplier: u32,
    /// Fraction of available memory the pipeline may plan to use.
    pub headroom_factor: f64,
}

impl Default for MemoryGate {
    fn default() -> Self {
        Self {
            peak_multiplier: 3,
            headroom_factor: 0.5,
        }
    }
}

impl MemoryGate {
    /// Check a raw buffer size against the provider's current snapshot.
    pub fn check_bytes(
        &self,
        raw_bytes: u64,
        provider: &impl MemoryInfoProvider,
    ) -> Result<GateReport, MemorySafetyError> {
        let available = provider.snapshot().available();
        let estimated = estimate_peak_bytes(raw_bytes, self.peak_multiplier);
        let allowed = (available as f64 * self.headroom_factor) as u64;
        if estimated < allowed {
            Ok(GateReport { estimated, allowed })
        } else {
            Err(MemorySafetyError {
                estimated,
                allowed,
                available,
            })
        }
    }

    /// Check `raster`. The caller drops it on rejection.
    pub fn check(
        &self,
        raster: &RasterBuffer,
        provider: &impl MemoryInfoProvider,
    ) -> Result<GateReport, MemorySafetyError> {
        self.check_bytes(raster.byte_size(), provider)
    }
}
