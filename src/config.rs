use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::wire::parse::sanitize_bucket;

/// A timer percentile with its Graphite label.
///
/// The label keeps the textual form the value was given in, with dots
/// replaced by underscores, so `99.9` emits as `upper_99_9` and `-75` as
/// `lower_75`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "f64")]
pub struct Percentile {
    value: f64,
    label: String,
}

impl Percentile {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl FromStr for Percentile {
    type Err = std::num::ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().parse::<f64>()?;
        Ok(Self {
            value,
            label: s.trim().replace('.', "_"),
        })
    }
}

impl From<f64> for Percentile {
    fn from(value: f64) -> Self {
        Self {
            value,
            label: value.to_string().replace('.', "_"),
        }
    }
}

/// Runtime configuration consumed by the daemon core.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// UDP listen address. Default: "0.0.0.0:8125".
    #[serde(default = "default_address")]
    pub address: String,

    /// TCP listen address; empty disables the TCP listener.
    #[serde(default)]
    pub tcp_address: String,

    /// Graphite downstream address; "-" disables the network send.
    #[serde(default = "default_graphite")]
    pub graphite: String,

    /// Interval between flushes. Default: 10s.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Maximum UDP datagram size in bytes. Default: 1472.
    #[serde(default = "default_max_udp_packet_size")]
    pub max_udp_packet_size: usize,

    /// Remove gauges after emission instead of re-sending the last value.
    #[serde(default = "default_true")]
    pub delete_gauges: bool,

    /// Flush intervals an idle counter keeps emitting zeros. Default: 60.
    #[serde(default = "default_persist_count_keys")]
    pub persist_count_keys: u32,

    /// Flush intervals an idle timer count keeps emitting zeros. Default: 0.
    #[serde(default)]
    pub persist_timer_counts: u32,

    /// Bucket name for the per-interval received-observation count; empty
    /// disables it. Emitted without prefix/postfix.
    #[serde(default)]
    pub receive_counter: String,

    /// Prefix for every bucket name; sanitized on load.
    #[serde(default)]
    pub prefix: String,

    /// Postfix for every bucket name; sanitized on load.
    #[serde(default)]
    pub postfix: String,

    /// Timer percentiles to emit. Negative values select the low end of the
    /// sorted samples.
    #[serde(default)]
    pub percentiles: Vec<Percentile>,

    /// Log every line handed to graphite.
    #[serde(default)]
    pub debug: bool,
}

// --- Default value functions ---

fn default_address() -> String {
    "0.0.0.0:8125".to_string()
}

fn default_graphite() -> String {
    "127.0.0.1:2003".to_string()
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_max_udp_packet_size() -> usize {
    1472
}

fn default_true() -> bool {
    true
}

fn default_persist_count_keys() -> u32 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            tcp_address: String::new(),
            graphite: default_graphite(),
            flush_interval: default_flush_interval(),
            max_udp_packet_size: default_max_udp_packet_size(),
            delete_gauges: true,
            persist_count_keys: default_persist_count_keys(),
            persist_timer_counts: 0,
            receive_counter: String::new(),
            prefix: String::new(),
            postfix: String::new(),
            percentiles: Vec::new(),
            debug: false,
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.finalize()
    }

    /// Sanitizes the bucket affixes and validates the configuration.
    ///
    /// Must run before the config is handed to the core: the parser and the
    /// flush engine both assume the affixes are already sanitized.
    pub fn finalize(mut self) -> Result<Self> {
        self.prefix = sanitize_bucket(self.prefix.as_bytes());
        self.postfix = sanitize_bucket(self.postfix.as_bytes());
        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            bail!("address is required");
        }

        if self.graphite.is_empty() {
            bail!("graphite address is required (use \"-\" to disable sending)");
        }

        if self.flush_interval < Duration::from_secs(1) {
            bail!("flush_interval must be at least one second");
        }

        if self.max_udp_packet_size == 0 {
            bail!("max_udp_packet_size must be positive");
        }

        for pct in &self.percentiles {
            if !(-100.0..=100.0).contains(&pct.value()) {
                bail!("percentile {} out of range [-100, 100]", pct.label());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.address, "0.0.0.0:8125");
        assert_eq!(cfg.graphite, "127.0.0.1:2003");
        assert_eq!(cfg.flush_interval, Duration::from_secs(10));
        assert_eq!(cfg.max_udp_packet_size, 1472);
        assert!(cfg.delete_gauges);
        assert_eq!(cfg.persist_count_keys, 60);
        assert_eq!(cfg.persist_timer_counts, 0);
        assert!(cfg.tcp_address.is_empty());
        assert!(cfg.percentiles.is_empty());
    }

    #[test]
    fn test_percentile_from_str_keeps_textual_label() {
        let pct: Percentile = "99.9".parse().expect("valid percentile");
        assert_eq!(pct.value(), 99.9);
        assert_eq!(pct.label(), "99_9");

        let pct: Percentile = "-75".parse().expect("valid percentile");
        assert_eq!(pct.value(), -75.0);
        assert_eq!(pct.label(), "-75");

        assert!("ninety".parse::<Percentile>().is_err());
    }

    #[test]
    fn test_percentile_from_f64() {
        let pct = Percentile::from(99.9);
        assert_eq!(pct.label(), "99_9");

        let pct = Percentile::from(75.0);
        assert_eq!(pct.label(), "75");
    }

    #[test]
    fn test_finalize_sanitizes_affixes() {
        let cfg = Config {
            prefix: "sta ts/".to_string(),
            postfix: ".ho@st".to_string(),
            ..Default::default()
        };
        let cfg = cfg.finalize().expect("valid config");
        assert_eq!(cfg.prefix, "sta_ts-");
        assert_eq!(cfg.postfix, ".host");
    }

    #[test]
    fn test_validation_rejects_short_flush_interval() {
        let cfg = Config {
            flush_interval: Duration::from_millis(100),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("flush_interval"));
    }

    #[test]
    fn test_validation_rejects_zero_packet_size() {
        let cfg = Config {
            max_udp_packet_size: 0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_udp_packet_size"));
    }

    #[test]
    fn test_validation_rejects_out_of_range_percentile() {
        let cfg = Config {
            percentiles: vec![Percentile::from(150.0)],
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_validation_rejects_empty_graphite() {
        let cfg = Config {
            graphite: String::new(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
address: "127.0.0.1:9125"
graphite: "-"
flush_interval: 30s
percentiles: [90, -75, 99.9]
persist_timer_counts: 5
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("valid yaml");
        let cfg = cfg.finalize().expect("valid config");
        assert_eq!(cfg.address, "127.0.0.1:9125");
        assert_eq!(cfg.graphite, "-");
        assert_eq!(cfg.flush_interval, Duration::from_secs(30));
        assert_eq!(cfg.persist_timer_counts, 5);
        assert_eq!(cfg.percentiles.len(), 3);
        assert_eq!(cfg.percentiles[0].label(), "90");
        assert_eq!(cfg.percentiles[1].label(), "-75");
        assert_eq!(cfg.percentiles[2].label(), "99_9");
        // Defaults still apply for omitted fields.
        assert_eq!(cfg.max_udp_packet_size, 1472);
    }
}
