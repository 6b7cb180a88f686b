pub mod allocator;
pub mod client;
pub mod slice;
pub mod spatial;
pub mod station;

use anyhow::{Context, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::config::Config;
use crate::random::{cumulative_weights, weighted_index, Distributor};
use crate::stats::StatsCollector;

use client::{Client, ClientId};
use slice::Slice;
use spatial::SpatialIndex;
use station::{BaseStation, Coverage, StationId};

/// The simulation: arenas for clients and stations, the virtual clock, the
/// seeded RNG, the spatial index and the statistics collector.
///
/// The clock advances in quarter-tick units held as an integer; every
/// stochastic draw flows through the single RNG, so a run is a pure
/// function of its configuration plus the seed.
#[derive(Debug)]
pub struct Simulation {
    simulation_time: u64,
    dynamic_allocation: bool,
    seed: u64,
    quarters: u64,
    rng: SmallRng,
    spatial: SpatialIndex,
    pub clients: Vec<Client>,
    pub stations: Vec<BaseStation>,
    pub stats: StatsCollector,
}

impl Simulation {
    /// Build all simulation state from a validated configuration. Every
    /// distribution is resolved here; an unknown name or bad parameters
    /// fail before any state exists.
    pub fn from_config(config: &Config) -> Result<Self> {
        let seed = config.settings.seed.unwrap_or_else(rand::random);
        info!(seed, "PRNG seeded");
        let mut rng = SmallRng::seed_from_u64(seed);

        // Weighted-draw tables follow the configuration's map order.
        let slice_cumulative = cumulative_weights(
            &config
                .slices
                .values()
                .map(|s| s.client_weight)
                .collect::<Vec<_>>(),
        );
        let mobility_cumulative = cumulative_weights(
            &config
                .mobility_patterns
                .values()
                .map(|m| m.client_weight)
                .collect::<Vec<_>>(),
        );

        let mobility_patterns: Vec<Distributor> = config
            .mobility_patterns
            .iter()
            .map(|(name, m)| {
                Distributor::new(name.clone(), &m.distribution, &m.params)
                    .with_context(|| format!("mobility pattern '{name}'"))
            })
            .collect::<Result<_>>()?;

        let usage_patterns: Vec<Distributor> = config
            .slices
            .iter()
            .map(|(name, s)| {
                Distributor::new(
                    name.clone(),
                    &s.usage_pattern.distribution,
                    &s.usage_pattern.params,
                )
                .with_context(|| format!("slice '{name}' usage pattern"))
            })
            .collect::<Result<_>>()?;

        let stations: Vec<BaseStation> = config
            .base_stations
            .iter()
            .enumerate()
            .map(|(i, bs)| {
                let slices: Vec<Slice> = config
                    .slices
                    .iter()
                    .zip(&usage_patterns)
                    .map(|((name, s), pattern)| {
                        let init_capacity = bs.capacity_bandwidth * bs.ratios[name.as_str()];
                        Slice::new(
                            name.clone(),
                            s.delay_tolerance,
                            s.qos_class,
                            s.bandwidth_guaranteed,
                            s.bandwidth_max,
                            init_capacity,
                            pattern.clone(),
                        )
                    })
                    .collect();
                BaseStation::new(
                    StationId(i),
                    Coverage::new((bs.x, bs.y), bs.coverage),
                    bs.capacity_bandwidth,
                    slices,
                )
            })
            .collect();

        let location = &config.clients.location;
        let location_x = Distributor::new("location.x", &location.x.distribution, &location.x.params)
            .context("client location x")?;
        let location_y = Distributor::new("location.y", &location.y.distribution, &location.y.params)
            .context("client location y")?;

        let freq = &config.clients.usage_frequency;
        let usage_freq_pattern = Distributor::new("usage_frequency", &freq.distribution, &freq.params)
            .context("client usage frequency")?
            .with_divide_scale(freq.divide_scale);

        let mut clients = Vec::with_capacity(config.settings.num_clients);
        for pk in 0..config.settings.num_clients {
            let x = location_x.sample(&mut rng);
            let y = location_y.sample(&mut rng);
            let mobility =
                mobility_patterns[weighted_index(&mobility_cumulative, rng.gen())].clone();
            let subscribed_slice = weighted_index(&slice_cumulative, rng.gen());
            let usage_freq = usage_freq_pattern.sample_scaled(&mut rng).clamp(0.0, 1.0);

            clients.push(Client::new(
                ClientId(pk),
                x,
                y,
                mobility,
                usage_freq,
                subscribed_slice,
            ));
        }

        // Initial assigning rebuild at t = 0.
        let mut spatial = SpatialIndex::new(config.settings.limit_closest_base_stations);
        spatial.rebuild(&mut clients, &stations, 0, true);

        let stats = StatsCollector::new(
            config.settings.statistics_params.clone(),
            config.settings.latency_tracking,
        );

        Ok(Self {
            simulation_time: config.settings.simulation_time,
            dynamic_allocation: config.settings.dynamic_allocation,
            seed,
            quarters: 0,
            rng,
            spatial,
            clients,
            stations,
            stats,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn virtual_time(&self) -> f64 {
        self.quarters as f64 * 0.25
    }

    fn tick(&self) -> u64 {
        self.quarters / 4
    }

    /// Drive the loop until virtual time reaches `simulation_time`.
    pub fn run(&mut self) {
        info!(
            simulation_time = self.simulation_time,
            clients = self.clients.len(),
            stations = self.stations.len(),
            "simulation started"
        );
        let total_quarters = self.simulation_time * 4;
        while self.quarters < total_quarters {
            self.step_quarter();
        }
        info!("simulation finished");
    }

    /// Advance the clock by one quarter tick, dispatching the sub-phase
    /// every process owes at this offset:
    ///
    /// | offset | work                                            |
    /// |--------|-------------------------------------------------|
    /// | .00    | client Lock phases, then the dynamic allocator  |
    /// | .25    | client Stats phases                             |
    /// | .50    | client Release phases, then the allocator       |
    /// | .75    | client Move phases, then per-tick aggregation   |
    ///
    /// Clients are visited in pk order within every sub-phase; the stats
    /// counters reset right after aggregation, before the next Lock.
    pub fn step_quarter(&mut self) {
        match self.quarters % 4 {
            0 => {
                self.lock_phases();
                if self.dynamic_allocation {
                    self.run_allocator();
                }
            }
            1 => {
                for c in &mut self.clients {
                    client::stats_phase(c);
                }
            }
            2 => {
                let now = self.virtual_time();
                for ci in 0..self.clients.len() {
                    client::release_phase(&mut self.clients[ci], &mut self.stations, now);
                }
                if self.dynamic_allocation {
                    self.run_allocator();
                }
            }
            3 => {
                self.move_phases();
                self.stats.collect(&self.clients, &self.stations);
            }
            _ => unreachable!(),
        }
        self.quarters += 1;
    }

    fn lock_phases(&mut self) {
        let now = self.virtual_time();
        let tick = self.tick();
        for ci in 0..self.clients.len() {
            let refresh = client::lock_phase(
                &mut self.clients[ci],
                &mut self.stations,
                &mut self.stats,
                &mut self.rng,
                now,
            );
            if refresh {
                self.spatial
                    .rebuild(&mut self.clients, &self.stations, tick, false);
            }
        }
    }

    fn move_phases(&mut self) {
        let now = self.virtual_time();
        let tick = self.tick();
        for ci in 0..self.clients.len() {
            let refresh = client::move_phase(
                &mut self.clients[ci],
                &mut self.stations,
                &mut self.rng,
                now,
            );
            if refresh {
                self.spatial
                    .rebuild(&mut self.clients, &self.stations, tick, false);
            }
        }
    }

    fn run_allocator(&mut self) {
        let now = self.virtual_time();
        allocator::allocate(&mut self.clients, &self.stations, now);
    }
}
