use rand::Rng;
use tracing::{debug, warn};

use crate::random::Distributor;
use crate::stats::StatsCollector;

use super::slice::Slice;
use super::station::{distance, BaseStation, StationId};

/// Tolerance below which consume grants get the low-latency boost.
const LOW_LATENCY_TOLERANCE: f64 = 10.0;

/// Grant multiplier for low-latency slices.
const LOW_LATENCY_BOOST: f64 = 1.2;

/// Stable handle into the client arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub usize);

/// A mobile subscriber. State advances through the four sub-tick phases
/// (Lock, Stats, Release, Move) driven by the simulation loop; nothing
/// here runs on its own.
#[derive(Debug)]
pub struct Client {
    pub pk: ClientId,
    pub x: f64,
    pub y: f64,
    pub mobility: Distributor,

    /// Probability that an idle tick issues no new request.
    pub usage_freq: f64,

    /// Index into every station's slice list; fixed at creation.
    pub subscribed_slice: usize,

    /// Current attachment; `None` means uncovered.
    pub base_station: Option<StationId>,

    /// True iff a session is counted in the slice's user count.
    pub connected: bool,

    /// Units still owed on the current request; zero means idle.
    pub usage_remaining: f64,

    /// Units acquired in the most recent consume, returned on Release.
    pub last_usage: f64,

    /// Written by the dynamic allocator; consume prefers it over the
    /// slice's share formula.
    pub allocated_bandwidth: Option<f64>,

    /// Virtual time the current request or attempt began.
    pub request_start_time: f64,

    /// K-nearest `(distance, station)` pairs, owned by the spatial index.
    pub closest_stations: Vec<(f64, StationId)>,

    // Latency series
    pub latencies: Vec<f64>,
    latency_sum: f64,
    pub last_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub avg_latency: f64,

    // Handover series
    pub handover_count: u64,
    pub handover_latencies: Vec<f64>,

    // Cumulative counters
    pub total_connected_time: f64,
    pub total_unconnected_time: f64,
    pub total_request_count: u64,
    pub total_consume_time: u64,
    pub total_usage: f64,
}

impl Client {
    pub fn new(
        pk: ClientId,
        x: f64,
        y: f64,
        mobility: Distributor,
        usage_freq: f64,
        subscribed_slice: usize,
    ) -> Self {
        Self {
            pk,
            x,
            y,
            mobility,
            usage_freq,
            subscribed_slice,
            base_station: None,
            connected: false,
            usage_remaining: 0.0,
            last_usage: 0.0,
            allocated_bandwidth: None,
            request_start_time: 0.0,
            closest_stations: Vec::new(),
            latencies: Vec::new(),
            latency_sum: 0.0,
            last_latency: 0.0,
            min_latency: f64::INFINITY,
            max_latency: 0.0,
            avg_latency: 0.0,
            handover_count: 0,
            handover_latencies: Vec::new(),
            total_connected_time: 0.0,
            total_unconnected_time: 0.0,
            total_request_count: 0,
            total_consume_time: 0,
            total_usage: 0.0,
        }
    }

    pub fn slice_of<'a>(&self, stations: &'a [BaseStation]) -> Option<&'a Slice> {
        let sid = self.base_station?;
        stations[sid.0].slices.get(self.subscribed_slice)
    }

    /// Average latency over recorded handovers, zero when none happened.
    pub fn avg_handover_latency(&self) -> f64 {
        if self.handover_latencies.is_empty() {
            0.0
        } else {
            self.handover_latencies.iter().sum::<f64>() / self.handover_latencies.len() as f64
        }
    }

    /// Fraction of accounted time spent connected.
    pub fn connected_time_ratio(&self) -> f64 {
        let total = self.total_connected_time + self.total_unconnected_time;
        if total > 0.0 {
            self.total_connected_time / total
        } else {
            0.0
        }
    }

    fn record_latency(&mut self, latency: f64) {
        self.latencies.push(latency);
        self.latency_sum += latency;
        self.last_latency = latency;
        self.max_latency = self.max_latency.max(latency);
        self.min_latency = self.min_latency.min(latency);
        self.avg_latency = self.latency_sum / self.latencies.len() as f64;
    }
}

/// Lock phase (offset .00): decide whether to issue a new request or keep
/// serving the current one. Returns true when a spatial-index refresh is
/// needed (the client found no covering station).
pub fn lock_phase<R: Rng + ?Sized>(
    client: &mut Client,
    stations: &mut [BaseStation],
    stats: &mut StatsCollector,
    rng: &mut R,
    now: f64,
) -> bool {
    if client.base_station.is_none() {
        return false;
    }

    if client.usage_remaining > 0.0 {
        if client.connected {
            start_consume(client, stations, now);
            false
        } else {
            client.request_start_time = now;
            connect(client, stations, stats, now)
        }
    } else if client.connected {
        disconnect(client, stations);
        false
    } else {
        generate_usage_and_connect(client, stations, stats, rng, now)
    }
}

/// Stats phase (offset .25): accrue connected or unconnected time.
pub fn stats_phase(client: &mut Client) {
    if client.connected {
        client.total_connected_time += 0.25;
    } else {
        client.total_unconnected_time += 0.25;
    }
}

/// Release phase (offset .50): return the last consume's units to the
/// slice, record the service latency, and detach when the request is done.
pub fn release_phase(client: &mut Client, stations: &mut [BaseStation], now: f64) {
    if !client.connected || client.last_usage <= 0.0 {
        return;
    }

    release_consume(client, stations, now);

    if client.usage_remaining <= 0.0 {
        disconnect(client, stations);
    }
}

/// Move phase (offset .75): apply one mobility sample; on leaving coverage
/// detach and re-attach to the best eligible station other than the one
/// just left. Returns true when a spatial-index refresh is needed.
pub fn move_phase<R: Rng + ?Sized>(
    client: &mut Client,
    stations: &mut [BaseStation],
    rng: &mut R,
    now: f64,
) -> bool {
    let (dx, dy) = client.mobility.sample_movement(rng);
    client.x += dx;
    client.y += dy;

    match client.base_station {
        Some(sid) => {
            if stations[sid.0].coverage.contains(client.x, client.y) {
                return false;
            }

            let handover_start = now;
            disconnect(client, stations);

            match select_station(client, stations, Some(sid)) {
                Some(new_sid) => {
                    client.base_station = Some(new_sid);
                    client.handover_latencies.push(now - handover_start);
                    client.handover_count += 1;
                    debug!(
                        client = client.pk.0,
                        from = sid.0,
                        to = new_sid.0,
                        "left coverage, handed over"
                    );
                    false
                }
                None => {
                    client.base_station = None;
                    debug!(client = client.pk.0, "left coverage, now uncovered");
                    true
                }
            }
        }
        None => match select_station(client, stations, None) {
            Some(sid) => {
                client.base_station = Some(sid);
                debug!(client = client.pk.0, station = sid.0, "re-entered coverage");
                false
            }
            None => true,
        },
    }
}

/// With probability `1 - usage_freq`, draw a fresh request size and attempt
/// to connect. Returns true when a spatial-index refresh is needed.
fn generate_usage_and_connect<R: Rng + ?Sized>(
    client: &mut Client,
    stations: &mut [BaseStation],
    stats: &mut StatsCollector,
    rng: &mut R,
    now: f64,
) -> bool {
    let roll: f64 = rng.gen();
    if client.usage_freq >= roll {
        return false;
    }
    let Some(slice) = client.slice_of(stations) else {
        return false;
    };

    client.usage_remaining = slice.usage_pattern.sample(rng).max(0.0);
    client.total_request_count += 1;
    client.request_start_time = now;
    debug!(
        client = client.pk.0,
        x = client.x,
        y = client.y,
        usage = client.usage_remaining,
        "new request"
    );
    connect(client, stations, stats, now)
}

/// Attempt admission to the subscribed slice at the current station. On
/// rejection, perform one bounded reattachment step (excluding the current
/// station) with handover/block accounting; the retry happens at the next
/// Lock phase. Returns true when a spatial-index refresh is needed.
fn connect(
    client: &mut Client,
    stations: &mut [BaseStation],
    stats: &mut StatsCollector,
    now: f64,
) -> bool {
    if client.connected {
        return false;
    }
    let Some(sid) = client.base_station else {
        return false;
    };

    stats.incr_connect_attempt(client.x, client.y);

    let idx = client.subscribed_slice;
    if stations[sid.0].slices[idx].is_available() {
        let latency = now - client.request_start_time;
        let slice = &mut stations[sid.0].slices[idx];
        slice.connected_users += 1;
        slice.update_latency_stats(latency);
        client.connected = true;
        client.record_latency(latency);
        debug!(
            client = client.pk.0,
            station = sid.0,
            slice = idx,
            latency,
            "connected"
        );
        return false;
    }

    // Rejected: try the best other station once.
    debug!(
        client = client.pk.0,
        station = sid.0,
        slice = idx,
        "connection refused"
    );
    match select_station(client, stations, Some(sid)) {
        Some(new_sid) => {
            client.base_station = Some(new_sid);
            if new_sid != sid {
                // Same-instant reattachment: zero-latency handover sample.
                client.handover_latencies.push(0.0);
            }
            if stations[new_sid.0].slices[idx].is_available() {
                stats.incr_handover(client.x, client.y);
                client.handover_count += 1;
                debug!(client = client.pk.0, to = new_sid.0, "handover");
            } else {
                stats.incr_block(client.x, client.y);
                debug!(client = client.pk.0, "blocked");
            }
            false
        }
        None => {
            client.base_station = None;
            debug!(client = client.pk.0, "uncovered after refusal");
            true
        }
    }
}

/// Detach from the subscribed slice. Never returns bandwidth units; that
/// is the Release phase's job.
pub fn disconnect(client: &mut Client, stations: &mut [BaseStation]) {
    if !client.connected {
        debug!(client = client.pk.0, "already disconnected");
        return;
    }
    if let Some(sid) = client.base_station {
        let slice = &mut stations[sid.0].slices[client.subscribed_slice];
        slice.connected_users = slice.connected_users.saturating_sub(1);
    }
    client.connected = false;
    client.allocated_bandwidth = None;
    debug!(client = client.pk.0, "disconnected");
}

/// Acquire this tick's grant from the slice. The grant is the allocator's
/// figure when one is present, otherwise the slice's share formula, always
/// bounded by the remaining usage and the slice's current level.
fn start_consume(client: &mut Client, stations: &mut [BaseStation], now: f64) {
    let Some(sid) = client.base_station else {
        return;
    };
    client.request_start_time = now;

    let slice = &mut stations[sid.0].slices[client.subscribed_slice];
    let share = client
        .allocated_bandwidth
        .unwrap_or_else(|| slice.get_consumable_share());

    let mut amount = share.min(client.usage_remaining);
    if slice.delay_tolerance < LOW_LATENCY_TOLERANCE {
        amount = (amount * LOW_LATENCY_BOOST).min(client.usage_remaining);
    }

    let granted = slice.capacity.acquire(amount);
    client.last_usage = granted;
    debug!(
        client = client.pk.0,
        granted,
        remaining = client.usage_remaining,
        "consume"
    );
}

/// Return the last grant to the slice and record the service latency.
fn release_consume(client: &mut Client, stations: &mut [BaseStation], now: f64) {
    if client.last_usage <= 0.0 {
        // release of zero units must never reach the container
        return;
    }
    let Some(sid) = client.base_station else {
        return;
    };

    let latency = now - client.request_start_time;
    let slice = &mut stations[sid.0].slices[client.subscribed_slice];
    slice.capacity.release(client.last_usage);
    slice.update_latency_stats(latency);

    if latency > slice.delay_tolerance {
        warn!(
            client = client.pk.0,
            latency,
            tolerance = slice.delay_tolerance,
            slice = %slice.name,
            "latency exceeded slice tolerance"
        );
    }

    client.record_latency(latency);
    client.total_consume_time += 1;
    client.total_usage += client.last_usage;
    client.usage_remaining = (client.usage_remaining - client.last_usage).max(0.0);
    client.last_usage = 0.0;
    debug!(
        client = client.pk.0,
        latency,
        remaining = client.usage_remaining,
        "release"
    );
}

/// Pick the best station from the cached K-nearest list by load-weighted
/// score `distance * (1 + load)`, lower wins, ties broken by lower pk.
/// Only stations whose disk covers the client qualify.
pub fn select_station(
    client: &Client,
    stations: &[BaseStation],
    exclude: Option<StationId>,
) -> Option<StationId> {
    let mut scored: Vec<(f64, f64, StationId)> = client
        .closest_stations
        .iter()
        .filter(|(_, sid)| Some(*sid) != exclude)
        .map(|(_, sid)| {
            let bs = &stations[sid.0];
            let d = distance((client.x, client.y), bs.coverage.center());
            let load = bs
                .slices
                .get(client.subscribed_slice)
                .filter(|s| s.init_capacity > 0.0)
                .map(|s| 1.0 - s.capacity.level() / s.init_capacity)
                .unwrap_or(0.0);
            (d * (1.0 + load), d, *sid)
        })
        .collect();

    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.2 .0.cmp(&b.2 .0)));

    scored
        .iter()
        .find(|(_, d, sid)| *d <= stations[sid.0].coverage.radius())
        .map(|(_, _, sid)| *sid)
}
