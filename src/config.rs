use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Error raised while loading or validating the configuration file.
/// All variants are fatal before any simulation state is constructed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("base station {station} references unknown slice '{name}' in ratios")]
    UnknownSlice { station: usize, name: String },

    #[error("base station {station} is missing a ratio for slice '{name}'")]
    MissingRatio { station: usize, name: String },

    #[error("settings.log_file is required when settings.logging is true")]
    MissingLogFile,
}

fn default_true() -> bool {
    true
}

/// Root of the YAML configuration file.
///
/// `slices` and `mobility_patterns` are ordered maps: the position of a
/// slice in the file defines its slice index everywhere in the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub settings: Settings,
    pub slices: IndexMap<String, SliceConfig>,
    pub mobility_patterns: IndexMap<String, MobilityConfig>,
    pub base_stations: Vec<BaseStationConfig>,
    pub clients: ClientsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// End of virtual time.
    pub simulation_time: u64,

    /// Population size.
    pub num_clients: usize,

    /// K for the spatial index: nearest stations cached per client.
    pub limit_closest_base_stations: usize,

    /// PRNG seed. Absent → seeded from entropy (the chosen seed is logged
    /// so the run can be replayed).
    #[serde(default)]
    pub seed: Option<u64>,

    /// Route per-event logs to `log_file` instead of stderr.
    #[serde(default)]
    pub logging: bool,

    /// Log file path, required when `logging` is true.
    #[serde(default)]
    pub log_file: Option<String>,

    /// Record latencies and emit the latency analysis report (default true).
    #[serde(default = "default_true")]
    pub latency_tracking: bool,

    /// Run the periodic dynamic bandwidth allocator (default true).
    #[serde(default = "default_true")]
    pub dynamic_allocation: bool,

    pub statistics_params: StatisticsParams,
}

/// Restricts which clients contribute to per-tick statistics, and trims
/// the reporting window at both ends of the run.
#[derive(Debug, Clone, Deserialize)]
pub struct StatisticsParams {
    /// Fraction of `simulation_time` trimmed from the start of the report.
    #[serde(default)]
    pub warmup_ratio: f64,

    /// Fraction of `simulation_time` trimmed from the end of the report.
    #[serde(default)]
    pub cooldown_ratio: f64,

    pub x: Range,
    pub y: Range,
}

impl StatisticsParams {
    /// Whether a point lies inside the statistics rectangle.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.x.min <= x && x <= self.x.max && self.y.min <= y && y <= self.y.max
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SliceConfig {
    /// Weight in the cumulative draw assigning new clients to slices.
    pub client_weight: f64,

    /// Latency threshold; a measured latency above it is an SLA violation.
    pub delay_tolerance: f64,

    /// Priority class, lower = higher priority. Classes <= 2 get boosted
    /// shares and conservative admission.
    pub qos_class: u8,

    /// Per-user minimum that admission must preserve.
    pub bandwidth_guaranteed: f64,

    /// Per-user hard cap.
    pub bandwidth_max: f64,

    /// Size distribution of a fresh request.
    pub usage_pattern: DistributionSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MobilityConfig {
    /// Weight in the cumulative draw assigning patterns to new clients.
    pub client_weight: f64,

    pub distribution: String,

    #[serde(default)]
    pub params: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistributionSpec {
    pub distribution: String,

    #[serde(default)]
    pub params: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaseStationConfig {
    pub x: f64,
    pub y: f64,

    /// Coverage disk radius.
    pub coverage: f64,

    /// Total bandwidth budget split among slices via `ratios`.
    pub capacity_bandwidth: f64,

    /// Per-slice share of `capacity_bandwidth`. Sums above 1 are tolerated
    /// (slice capacities then exceed the nominal budget) but warned about.
    pub ratios: IndexMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientsConfig {
    pub location: LocationConfig,
    pub usage_frequency: UsageFrequencyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub x: DistributionSpec,
    pub y: DistributionSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageFrequencyConfig {
    pub distribution: String,

    #[serde(default)]
    pub params: Vec<f64>,

    /// The generated value is divided by this before use.
    pub divide_scale: f64,
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.display().to_string())
            } else {
                ConfigError::Io(e)
            }
        })?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks beyond what serde enforces. Ratio sums above 1 are
    /// tolerated with a warning (slice capacities then exceed the nominal
    /// station budget); unknown slice names in ratios are fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, bs) in self.base_stations.iter().enumerate() {
            for name in bs.ratios.keys() {
                if !self.slices.contains_key(name) {
                    return Err(ConfigError::UnknownSlice {
                        station: i,
                        name: name.clone(),
                    });
                }
            }
            for name in self.slices.keys() {
                if !bs.ratios.contains_key(name) {
                    return Err(ConfigError::MissingRatio {
                        station: i,
                        name: name.clone(),
                    });
                }
            }
            let ratio_sum: f64 = bs.ratios.values().sum();
            if ratio_sum > 1.0 + 1e-9 {
                warn!(
                    station = i,
                    ratio_sum,
                    "slice ratios exceed 1.0; slice capacities will exceed the station budget"
                );
            }
        }

        if self.settings.logging && self.settings.log_file.is_none() {
            return Err(ConfigError::MissingLogFile);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
settings:
  simulation_time: 10
  num_clients: 2
  limit_closest_base_stations: 3
  seed: 1
  statistics_params:
    warmup_ratio: 0.1
    cooldown_ratio: 0.1
    x: {min: 0, max: 100}
    y: {min: 0, max: 100}
slices:
  broadband:
    client_weight: 0.6
    delay_tolerance: 100
    qos_class: 3
    bandwidth_guaranteed: 1
    bandwidth_max: 10
    usage_pattern:
      distribution: randint
      params: [5, 5]
  urllc:
    client_weight: 0.4
    delay_tolerance: 5
    qos_class: 1
    bandwidth_guaranteed: 2
    bandwidth_max: 8
    usage_pattern:
      distribution: randint
      params: [2, 4]
mobility_patterns:
  stroll:
    client_weight: 1
    distribution: uniform
    params: [-1, 1]
base_stations:
  - x: 50
    y: 50
    coverage: 60
    capacity_bandwidth: 100
    ratios: {broadband: 0.6, urllc: 0.4}
clients:
  location:
    x: {distribution: uniform, params: [0, 100]}
    y: {distribution: uniform, params: [0, 100]}
  usage_frequency:
    distribution: randint
    params: [0, 100]
    divide_scale: 100
"#;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn minimal_yaml_parses_and_validates() {
        let cfg = parse(MINIMAL_YAML);
        cfg.validate().unwrap();
        assert_eq!(cfg.settings.num_clients, 2);
        assert_eq!(cfg.base_stations.len(), 1);
        assert_eq!(cfg.clients.usage_frequency.divide_scale, 100.0);
    }

    #[test]
    fn slice_order_follows_the_file() {
        let cfg = parse(MINIMAL_YAML);
        let names: Vec<_> = cfg.slices.keys().cloned().collect();
        assert_eq!(names, vec!["broadband", "urllc"]);
    }

    #[test]
    fn tracking_and_allocation_default_to_true() {
        let cfg = parse(MINIMAL_YAML);
        assert!(cfg.settings.latency_tracking);
        assert!(cfg.settings.dynamic_allocation);
        assert!(!cfg.settings.logging);
        assert!(cfg.settings.log_file.is_none());
    }

    #[test]
    fn unknown_slice_in_ratios_is_fatal() {
        let yaml = MINIMAL_YAML.replace("urllc: 0.4}", "ghost: 0.4}");
        let cfg = parse(&yaml);
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSlice { station: 0, .. }));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn missing_ratio_for_a_slice_is_fatal() {
        let yaml = MINIMAL_YAML.replace(", urllc: 0.4}", "}");
        let cfg = parse(&yaml);
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRatio { station: 0, .. }));
    }

    #[test]
    fn oversubscribed_ratios_are_tolerated() {
        let yaml = MINIMAL_YAML.replace("broadband: 0.6", "broadband: 0.9");
        let cfg = parse(&yaml);
        cfg.validate().unwrap();
    }

    #[test]
    fn logging_without_log_file_is_fatal() {
        let yaml = MINIMAL_YAML.replace("seed: 1", "seed: 1\n  logging: true");
        let cfg = parse(&yaml);
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::MissingLogFile
        ));
    }

    #[test]
    fn missing_file_reports_not_found() {
        let err = Config::from_path("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn statistics_rectangle_contains_boundary() {
        let cfg = parse(MINIMAL_YAML);
        let p = &cfg.settings.statistics_params;
        assert!(p.contains(0.0, 0.0));
        assert!(p.contains(100.0, 100.0));
        assert!(p.contains(50.0, 99.9));
        assert!(!p.contains(-0.1, 50.0));
        assert!(!p.contains(50.0, 100.1));
    }
}
