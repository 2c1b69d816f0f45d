//! Quota-aware rate limiter for the mail provider API
//!
//! The provider enforces a per-user quota measured in "quota units" per
//! second (250 by default). The operations this engine issues are cheap but
//! numerous:
//! - listing pages, full message gets, attachment gets: 5 units
//! - message modification (read-marking): 5 units
//!
//! This module implements a token bucket that refills at the provider's
//! rate, allows bursting while quota is available, and blocks when it is
//! exhausted.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Quota costs for the operations the sync engine performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCost {
    /// messages.list, messages.get, messages.attachments.get
    Read,
    /// messages.modify
    Modify,
    /// Custom cost for special operations
    Custom(u32),
}

impl QuotaCost {
    /// Get the quota unit cost for this operation type
    pub fn units(&self) -> u32 {
        match self {
            QuotaCost::Read => 5,
            QuotaCost::Modify => 5,
            QuotaCost::Custom(units) => *units,
        }
    }
}

/// Token bucket rate limiter for provider quota management
#[derive(Debug)]
pub struct QuotaRateLimiter {
    inner: Arc<Mutex<RateLimiterState>>,
}

#[derive(Debug)]
struct RateLimiterState {
    /// Current available quota units (tokens)
    available_units: f64,
    /// Maximum quota units that can be stored (burst capacity)
    max_units: f64,
    /// Quota units added per second
    refill_rate: f64,
    /// Last time we refilled the bucket
    last_refill: Instant,
    /// Total units consumed (for stats)
    total_consumed: u64,
    /// Total operations performed (for stats)
    total_operations: u64,
}

impl QuotaRateLimiter {
    /// Create a new rate limiter with the provider's default quota limits
    ///
    /// Default settings:
    /// - 250 quota units per second refill rate
    /// - 500 unit burst capacity (2 seconds worth)
    pub fn new() -> Self {
        Self::with_config(250.0, 500.0)
    }

    /// Create a rate limiter with custom configuration
    ///
    /// # Arguments
    /// * `refill_rate` - Quota units added per second
    /// * `max_units` - Maximum burst capacity
    pub fn with_config(refill_rate: f64, max_units: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterState {
                available_units: max_units, // Start with full bucket
                max_units,
                refill_rate,
                last_refill: Instant::now(),
                total_consumed: 0,
                total_operations: 0,
            })),
        }
    }

    /// Acquire quota units for an operation, waiting if necessary
    pub async fn acquire(&self, cost: QuotaCost) -> QuotaPermit {
        let units_needed = cost.units() as f64;

        loop {
            let wait_time = {
                let mut state = self.inner.lock().await;

                // Refill bucket based on elapsed time
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                let refill_amount = elapsed * state.refill_rate;
                state.available_units =
                    (state.available_units + refill_amount).min(state.max_units);
                state.last_refill = now;

                trace!(
                    "Quota state: {:.1}/{:.1} units available, requesting {:.0}",
                    state.available_units,
                    state.max_units,
                    units_needed
                );

                if state.available_units >= units_needed {
                    state.available_units -= units_needed;
                    state.total_consumed += units_needed as u64;
                    state.total_operations += 1;
                    return QuotaPermit { _private: () };
                }

                // How long until enough quota refills
                let units_deficit = units_needed - state.available_units;
                let wait_seconds = units_deficit / state.refill_rate;
                Duration::from_secs_f64(wait_seconds)
            };

            // Wait outside the lock to allow other operations to proceed
            debug!(
                "Quota exhausted, waiting {:.2}s for {} units",
                wait_time.as_secs_f64(),
                units_needed
            );
            tokio::time::sleep(wait_time).await;
        }
    }

    /// Get current statistics about quota usage
    pub async fn stats(&self) -> QuotaStats {
        let state = self.inner.lock().await;
        QuotaStats {
            available_units: state.available_units as u32,
            max_units: state.max_units as u32,
            refill_rate: state.refill_rate as u32,
            total_consumed: state.total_consumed,
            total_operations: state.total_operations,
        }
    }

    /// Check current available quota without consuming any
    pub async fn available(&self) -> f64 {
        let mut state = self.inner.lock().await;

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        let refill_amount = elapsed * state.refill_rate;
        state.available_units = (state.available_units + refill_amount).min(state.max_units);
        state.last_refill = now;

        state.available_units
    }
}

impl Default for QuotaRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for QuotaRateLimiter {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A permit representing acquired quota
#[derive(Debug)]
pub struct QuotaPermit {
    _private: (),
}

/// Statistics about quota usage
#[derive(Debug, Clone)]
pub struct QuotaStats {
    /// Currently available quota units
    pub available_units: u32,
    /// Maximum burst capacity
    pub max_units: u32,
    /// Refill rate (units per second)
    pub refill_rate: u32,
    /// Total quota units consumed since creation
    pub total_consumed: u64,
    /// Total operations performed
    pub total_operations: u64,
}
