use indexmap::IndexMap;
use serde::Serialize;

use crate::config::StatisticsParams;
use crate::engine::client::Client;
use crate::engine::station::BaseStation;

/// Per-tick aggregate time series. One entry per integer tick; the latency
/// series stay empty when latency tracking is off.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateSeries {
    pub connected_ratio: Vec<f64>,
    pub total_used_bandwidth: Vec<f64>,
    pub avg_slice_load_ratio: Vec<f64>,
    pub avg_slice_client_count: Vec<f64>,
    pub coverage_ratio: Vec<f64>,
    pub block_ratio: Vec<f64>,
    pub handover_ratio: Vec<f64>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub avg_latency: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub max_latency: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub min_latency: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sla_violation_rate: Vec<f64>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub per_slice_latency: IndexMap<String, Vec<f64>>,
}

impl AggregateSeries {
    /// Ticks collected so far.
    pub fn len(&self) -> usize {
        self.connected_ratio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mean of the per-tick average latency.
    pub fn overall_avg_latency(&self) -> f64 {
        mean(&self.avg_latency)
    }

    /// Mean per-tick latency for each slice name.
    pub fn avg_latency_by_slice(&self) -> IndexMap<String, f64> {
        self.per_slice_latency
            .iter()
            .map(|(name, series)| (name.clone(), mean(series)))
            .collect()
    }

    /// Mean per-tick SLA violation rate.
    pub fn overall_sla_violation_rate(&self) -> f64 {
        mean(&self.sla_violation_rate)
    }

    /// Copy restricted to tick indices `[start, end)`, for the
    /// warmup/cooldown reporting window.
    pub fn window(&self, start: usize, end: usize) -> Self {
        let clip = |v: &Vec<f64>| -> Vec<f64> {
            let end = end.min(v.len());
            let start = start.min(end);
            v[start..end].to_vec()
        };
        Self {
            connected_ratio: clip(&self.connected_ratio),
            total_used_bandwidth: clip(&self.total_used_bandwidth),
            avg_slice_load_ratio: clip(&self.avg_slice_load_ratio),
            avg_slice_client_count: clip(&self.avg_slice_client_count),
            coverage_ratio: clip(&self.coverage_ratio),
            block_ratio: clip(&self.block_ratio),
            handover_ratio: clip(&self.handover_ratio),
            avg_latency: clip(&self.avg_latency),
            max_latency: clip(&self.max_latency),
            min_latency: clip(&self.min_latency),
            sla_violation_rate: clip(&self.sla_violation_rate),
            per_slice_latency: self
                .per_slice_latency
                .iter()
                .map(|(name, series)| (name.clone(), clip(series)))
                .collect(),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Collects per-unit-tick aggregates over the clients inside the
/// statistics rectangle. Connect/block/handover counters accumulate during
/// the tick and reset right after aggregation, before the next tick's
/// first Lock phase.
#[derive(Debug)]
pub struct StatsCollector {
    area: StatisticsParams,
    latency_tracking: bool,

    connect_attempts: u64,
    blocks: u64,
    handovers: u64,

    attempts_per_tick: Vec<u64>,
    blocks_per_tick: Vec<u64>,
    handovers_per_tick: Vec<u64>,

    series: AggregateSeries,
}

impl StatsCollector {
    pub fn new(area: StatisticsParams, latency_tracking: bool) -> Self {
        Self {
            area,
            latency_tracking,
            connect_attempts: 0,
            blocks: 0,
            handovers: 0,
            attempts_per_tick: Vec::new(),
            blocks_per_tick: Vec::new(),
            handovers_per_tick: Vec::new(),
            series: AggregateSeries::default(),
        }
    }

    pub fn series(&self) -> &AggregateSeries {
        &self.series
    }

    /// Raw per-tick counter history (attempts, blocks, handovers).
    pub fn counter_history(&self) -> (&[u64], &[u64], &[u64]) {
        (
            &self.attempts_per_tick,
            &self.blocks_per_tick,
            &self.handovers_per_tick,
        )
    }

    pub fn attempts_this_tick(&self) -> u64 {
        self.connect_attempts
    }

    pub fn blocks_this_tick(&self) -> u64 {
        self.blocks
    }

    pub fn handovers_this_tick(&self) -> u64 {
        self.handovers
    }

    /// Count a connect attempt from a client at `(x, y)`. Only clients in
    /// the statistics rectangle contribute.
    pub fn incr_connect_attempt(&mut self, x: f64, y: f64) {
        if self.area.contains(x, y) {
            self.connect_attempts += 1;
        }
    }

    pub fn incr_block(&mut self, x: f64, y: f64) {
        if self.area.contains(x, y) {
            self.blocks += 1;
        }
    }

    pub fn incr_handover(&mut self, x: f64, y: f64) {
        if self.area.contains(x, y) {
            self.handovers += 1;
        }
    }

    fn in_area(&self, client: &Client) -> bool {
        self.area.contains(client.x, client.y)
    }

    /// Aggregate one integer tick and reset the counters.
    pub fn collect(&mut self, clients: &[Client], stations: &[BaseStation]) {
        let in_area: Vec<&Client> = clients.iter().filter(|c| self.in_area(c)).collect();
        let in_area_count = in_area.len();

        // Attempt-derived ratios, zero when nothing was attempted.
        let attempts = self.connect_attempts;
        let (block_ratio, handover_ratio) = if attempts > 0 {
            (
                self.blocks as f64 / attempts as f64,
                self.handovers as f64 / attempts as f64,
            )
        } else {
            (0.0, 0.0)
        };
        self.series.block_ratio.push(block_ratio);
        self.series.handover_ratio.push(handover_ratio);
        self.attempts_per_tick.push(attempts);
        self.blocks_per_tick.push(self.blocks);
        self.handovers_per_tick.push(self.handovers);

        // Connected ratio over in-area clients.
        let connected = in_area.iter().filter(|c| c.connected).count();
        self.series.connected_ratio.push(ratio(connected, in_area_count));

        // Bandwidth aggregates over every slice at every station.
        let mut used = 0.0;
        let mut total = 0.0;
        let mut users = 0u64;
        let mut slice_count = 0usize;
        for bs in stations {
            for slice in &bs.slices {
                used += slice.capacity.used();
                total += slice.capacity.total();
                users += slice.connected_users as u64;
                slice_count += 1;
            }
        }
        self.series.total_used_bandwidth.push(used);
        self.series
            .avg_slice_load_ratio
            .push(if total > 0.0 { used / total } else { 0.0 });
        self.series
            .avg_slice_client_count
            .push(if slice_count > 0 {
                users as f64 / slice_count as f64
            } else {
                0.0
            });

        // Coverage ratio: attached and inside the attachment's disk.
        let covered = in_area
            .iter()
            .filter(|c| {
                c.base_station
                    .is_some_and(|sid| stations[sid.0].coverage.contains(c.x, c.y))
            })
            .count();
        self.series.coverage_ratio.push(ratio(covered, in_area_count));

        if self.latency_tracking {
            self.collect_latency(&in_area, stations, in_area_count);
        }

        // Reset for the next tick.
        self.connect_attempts = 0;
        self.blocks = 0;
        self.handovers = 0;
    }

    /// Latest-observation latency aggregates over in-area clients.
    fn collect_latency(
        &mut self,
        in_area: &[&Client],
        stations: &[BaseStation],
        in_area_count: usize,
    ) {
        // Key set covers every slice name, in slice order.
        let mut per_slice: IndexMap<&str, Vec<f64>> = IndexMap::new();
        for bs in stations {
            for slice in &bs.slices {
                per_slice.entry(slice.name.as_str()).or_default();
            }
        }

        let mut latest = Vec::new();
        let mut violations = 0usize;

        for client in in_area {
            if client.latencies.is_empty() {
                continue;
            }
            latest.push(client.last_latency);

            if let Some(slice) = client.slice_of(stations) {
                if let Some(bucket) = per_slice.get_mut(slice.name.as_str()) {
                    bucket.push(client.last_latency);
                }
                if client.last_latency > slice.delay_tolerance {
                    violations += 1;
                }
            }
        }

        if latest.is_empty() {
            self.series.avg_latency.push(0.0);
            self.series.max_latency.push(0.0);
            self.series.min_latency.push(0.0);
        } else {
            self.series.avg_latency.push(mean(&latest));
            self.series
                .max_latency
                .push(latest.iter().copied().fold(f64::MIN, f64::max));
            self.series
                .min_latency
                .push(latest.iter().copied().fold(f64::MAX, f64::min));
        }

        self.series
            .sla_violation_rate
            .push(ratio(violations, in_area_count));

        for (name, values) in per_slice {
            self.series
                .per_slice_latency
                .entry(name.to_string())
                .or_default()
                .push(mean(&values));
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}
