// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection-pool lifecycle counters.
//!
//! Fed by the driver's CMAP events; read by the orchestrator to decide
//! backpressure. Counters only, no locking on the hot path.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Live pool counters.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    checked_out: AtomicI64,
    pending_checkouts: AtomicI64,
    checkouts_started: AtomicU64,
    checkout_failures: AtomicU64,
    pools_created: AtomicU64,
    pools_ready: AtomicU64,
    pools_cleared: AtomicU64,
    pools_closed: AtomicU64,
}

/// A point-in-time snapshot of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub checked_out: u32,
    pub pending_checkouts: u32,
    pub checkouts_started: u64,
    pub checkout_failures: u64,
    pub pools_created: u64,
    pub pools_ready: u64,
    pub pools_cleared: u64,
    pub pools_closed: u64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_checkout_started(&self) {
        self.checkouts_started.fetch_add(1, Ordering::Relaxed);
        self.pending_checkouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_checkout_failed(&self) {
        self.checkout_failures.fetch_add(1, Ordering::Relaxed);
        self.pending_checkouts.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn on_checked_out(&self) {
        self.pending_checkouts.fetch_sub(1, Ordering::Relaxed);
        self.checked_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_checked_in(&self) {
        self.checked_out.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn on_pool_created(&self) {
        self.pools_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_pool_ready(&self) {
        self.pools_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_pool_cleared(&self) {
        self.pools_cleared.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_pool_closed(&self) {
        self.pools_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStatus {
        PoolStatus {
            checked_out: self.checked_out.load(Ordering::Relaxed).max(0) as u32,
            pending_checkouts: self.pending_checkouts.load(Ordering::Relaxed).max(0) as u32,
            checkouts_started: self.checkouts_started.load(Ordering::Relaxed),
            checkout_failures: self.checkout_failures.load(Ordering::Relaxed),
            pools_created: self.pools_created.load(Ordering::Relaxed),
            pools_ready: self.pools_ready.load(Ordering::Relaxed),
            pools_cleared: self.pools_cleared.load(Ordering::Relaxed),
            pools_closed: self.pools_closed.load(Ordering::Relaxed),
        }
    }
}
