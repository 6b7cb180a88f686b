use std::collections::VecDeque;

use tracing::debug;

use crate::random::Distributor;

/// Measurements kept in the latency window.
const LATENCY_HISTORY_LEN: usize = 100;

/// Trailing measurements used for the reservation trend.
const TREND_WINDOW: usize = 5;

/// Reservation moves in steps of these fractions of `init_capacity`,
/// bounded by `RESERVE_MAX_RATIO`.
const RESERVE_STEP_UP: f64 = 0.02;
const RESERVE_STEP_DOWN: f64 = 0.01;
const RESERVE_MAX_RATIO: f64 = 0.1;

/// QoS classes at or below this get boosted shares and conservative
/// admission.
const PRIORITY_QOS_CLASS: u8 = 2;

/// Share multiplier for priority classes.
const PRIORITY_SHARE_BOOST: f64 = 1.2;

/// Bandwidth container with `acquire`/`release` and a current level in
/// `[0, total]`. Execution is serialized by the scheduler, so plain floats
/// suffice; the clamp in `acquire` makes underflow impossible.
#[derive(Debug, Clone)]
pub struct Capacity {
    level: f64,
    total: f64,
}

impl Capacity {
    pub fn new(total: f64) -> Self {
        Self {
            level: total,
            total,
        }
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// Bandwidth currently held by clients.
    pub fn used(&self) -> f64 {
        self.total - self.level
    }

    /// Take up to `amount` from the container, returning what was actually
    /// taken (clamped at the current level).
    pub fn acquire(&mut self, amount: f64) -> f64 {
        let granted = amount.min(self.level).max(0.0);
        self.level -= granted;
        granted
    }

    /// Return `amount` to the container. Callers must not release zero and
    /// must never return more than they took.
    pub fn release(&mut self, amount: f64) {
        debug_assert!(amount > 0.0, "release of zero units is a caller bug");
        self.level = (self.level + amount).min(self.total);
    }
}

/// Bounded FIFO of recent latency measurements with a running sum, so the
/// average does not require a rescan on every push.
#[derive(Debug, Default)]
struct LatencyWindow {
    samples: VecDeque<f64>,
    sum: f64,
}

impl LatencyWindow {
    fn push(&mut self, value: f64) {
        self.samples.push_back(value);
        self.sum += value;
        if self.samples.len() > LATENCY_HISTORY_LEN {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted;
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    /// Average of the trailing `n` samples.
    fn trailing_average(&self, n: usize) -> f64 {
        let n = n.min(self.samples.len());
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().rev().take(n).sum();
        sum / n as f64
    }
}

/// A named partition of a base station's bandwidth with its own QoS
/// profile, admission rule and latency tolerance. One instance exists per
/// (station, slice name) pair; the name identifies the logical slice.
#[derive(Debug)]
pub struct Slice {
    pub name: String,
    pub delay_tolerance: f64,
    pub qos_class: u8,
    pub bandwidth_guaranteed: f64,
    pub bandwidth_max: f64,
    pub init_capacity: f64,
    pub capacity: Capacity,
    pub connected_users: u32,
    pub usage_pattern: Distributor,
    reserved_capacity: f64,
    latency_window: LatencyWindow,
    sla_violations: u64,
}

impl Slice {
    pub fn new(
        name: impl Into<String>,
        delay_tolerance: f64,
        qos_class: u8,
        bandwidth_guaranteed: f64,
        bandwidth_max: f64,
        init_capacity: f64,
        usage_pattern: Distributor,
    ) -> Self {
        Self {
            name: name.into(),
            delay_tolerance,
            qos_class,
            bandwidth_guaranteed,
            bandwidth_max,
            init_capacity,
            capacity: Capacity::new(init_capacity),
            connected_users: 0,
            usage_pattern,
            reserved_capacity: 0.0,
            latency_window: LatencyWindow::default(),
            sla_violations: 0,
        }
    }

    pub fn avg_latency(&self) -> f64 {
        self.latency_window.average()
    }

    pub fn reserved_capacity(&self) -> f64 {
        self.reserved_capacity
    }

    pub fn sla_violations(&self) -> u64 {
        self.sla_violations
    }

    pub fn latency_history_len(&self) -> usize {
        self.latency_window.len()
    }

    /// Whether this slice is a boosted, conservatively-admitted priority
    /// class.
    pub fn is_priority(&self) -> bool {
        self.qos_class <= PRIORITY_QOS_CLASS
    }

    /// Per-user bandwidth offered for the next consume phase.
    pub fn get_consumable_share(&self) -> f64 {
        if self.connected_users == 0 {
            return self.init_capacity.min(self.bandwidth_max);
        }
        let base = (self.init_capacity / self.connected_users as f64).min(self.bandwidth_max);
        if self.is_priority() {
            (base * PRIORITY_SHARE_BOOST).min(self.bandwidth_max)
        } else {
            base
        }
    }

    /// Admission control for one additional user. The reserved capacity is
    /// excluded from the pool, and priority slices refuse new users while
    /// their recent latency approaches the tolerance.
    pub fn is_available(&self) -> bool {
        let real_cap = self.init_capacity.min(self.bandwidth_max);
        let pool = real_cap - self.reserved_capacity;

        if pool / ((self.connected_users + 1) as f64) < self.bandwidth_guaranteed {
            return false;
        }

        if self.is_priority()
            && self.avg_latency() > 0.7 * self.delay_tolerance
            && self.connected_users as f64 >= pool / (1.5 * self.bandwidth_guaranteed)
        {
            return false;
        }

        true
    }

    /// Record a measured latency: maintain the bounded window and average,
    /// count SLA violations, and adapt the reserved capacity with the
    /// latency trend.
    pub fn update_latency_stats(&mut self, latency: f64) {
        self.latency_window.push(latency);

        if latency > self.delay_tolerance {
            self.sla_violations += 1;
        }

        self.adapt_reserved_capacity();
    }

    /// Trend rule over the trailing window: recent average above the
    /// overall average and near the tolerance raises the reservation;
    /// recent average below both lowers it.
    fn adapt_reserved_capacity(&mut self) {
        if self.latency_window.len() < TREND_WINDOW {
            return;
        }

        let recent_avg = self.latency_window.trailing_average(TREND_WINDOW);
        let avg = self.latency_window.average();

        if recent_avg > avg && recent_avg > 0.8 * self.delay_tolerance {
            let raised = self.reserved_capacity + self.init_capacity * RESERVE_STEP_UP;
            self.reserved_capacity = raised.min(self.init_capacity * RESERVE_MAX_RATIO);
            debug!(
                slice = %self.name,
                reserved = self.reserved_capacity,
                recent_avg,
                "raised reserved capacity"
            );
        } else if recent_avg < avg && recent_avg < 0.5 * self.delay_tolerance {
            let lowered = self.reserved_capacity - self.init_capacity * RESERVE_STEP_DOWN;
            self.reserved_capacity = lowered.max(0.0);
        }
    }
}
