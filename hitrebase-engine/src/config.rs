//! Run configuration and its JSON schema.

use crate::convert::PIPELINE_LATENCY;
use crate::{Error, Result};
use hitrebase_core::WRAP_PERIOD;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Sensor readout mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitMode {
    /// Hits without energy measurement.
    Short,
    /// Hits with energy measurement.
    #[default]
    Long,
    /// Pseudo-random test pattern; timestamps are not rebased.
    Prbs,
    /// Mode not known to the datapath; hits are discarded.
    Unknown,
}

impl HitMode {
    /// Register encoding.
    #[must_use]
    pub fn to_bits(self) -> u32 {
        match self {
            HitMode::Short => 0,
            HitMode::Long => 1,
            HitMode::Prbs => 2,
            HitMode::Unknown => 3,
        }
    }

    /// Register decoding; only the low two bits are used.
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => HitMode::Short,
            1 => HitMode::Long,
            2 => HitMode::Prbs,
            _ => HitMode::Unknown,
        }
    }
}

/// Configuration of the rebasing datapath and run control.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Allow the transition into `Running`.
    pub go: bool,
    /// Disable admission in every state.
    pub force_stop: bool,
    /// Hold the whole datapath in reset.
    pub soft_reset: bool,
    /// Sensor readout mode.
    pub hit_mode: HitMode,
    /// Feed undecoded local time straight to the converter.
    pub bypass_rebase: bool,
    /// Drop hits carrying the sensor error flag.
    pub discard_hit_err: bool,
    /// Expected upstream latency in reference ticks.
    pub expected_latency_ticks: u32,
    /// Bit mask of links taking part in the run.
    pub enabled_links: u16,
    /// Grace period for end-of-stream markers while flushing.
    pub flush_timeout_ticks: u32,
    /// Entries kept by each debug side-channel.
    pub debug_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            go: true,
            force_stop: false,
            soft_reset: false,
            hit_mode: HitMode::Long,
            bypass_rebase: false,
            discard_hit_err: true,
            expected_latency_ticks: 2000,
            enabled_links: 0x000F,
            flush_timeout_ticks: 100_000,
            debug_capacity: 1024,
        }
    }
}

// Intermediate structs for the JSON schema; every section is optional.
#[derive(Deserialize)]
struct JsonConfig {
    frontend: JsonFrontend,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct JsonFrontend {
    run_control: JsonRunControl,
    datapath: JsonDatapath,
    links: JsonLinks,
    debug: JsonDebug,
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonRunControl {
    go: bool,
    force_stop: bool,
    soft_reset: bool,
}

impl Default for JsonRunControl {
    fn default() -> Self {
        let defaults = RunConfig::default();
        Self {
            go: defaults.go,
            force_stop: defaults.force_stop,
            soft_reset: defaults.soft_reset,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonDatapath {
    hit_mode: HitMode,
    bypass_rebase: bool,
    discard_hit_err: bool,
    expected_latency_ticks: u32,
}

impl Default for JsonDatapath {
    fn default() -> Self {
        let defaults = RunConfig::default();
        Self {
            hit_mode: defaults.hit_mode,
            bypass_rebase: defaults.bypass_rebase,
            discard_hit_err: defaults.discard_hit_err,
            expected_latency_ticks: defaults.expected_latency_ticks,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonLinks {
    enabled_mask: u16,
    flush_timeout_ticks: u32,
}

impl Default for JsonLinks {
    fn default() -> Self {
        let defaults = RunConfig::default();
        Self {
            enabled_mask: defaults.enabled_links,
            flush_timeout_ticks: defaults.flush_timeout_ticks,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonDebug {
    capacity: usize,
}

impl Default for JsonDebug {
    fn default() -> Self {
        Self {
            capacity: RunConfig::default().debug_capacity,
        }
    }
}

impl RunConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the go flag.
    #[must_use]
    pub fn with_go(mut self, go: bool) -> Self {
        self.go = go;
        self
    }

    /// Sets the force-stop flag.
    #[must_use]
    pub fn with_force_stop(mut self, force_stop: bool) -> Self {
        self.force_stop = force_stop;
        self
    }

    /// Sets the readout mode.
    #[must_use]
    pub fn with_hit_mode(mut self, hit_mode: HitMode) -> Self {
        self.hit_mode = hit_mode;
        self
    }

    /// Sets rebase bypass.
    #[must_use]
    pub fn with_bypass_rebase(mut self, bypass: bool) -> Self {
        self.bypass_rebase = bypass;
        self
    }

    /// Sets the hit-error discard policy.
    #[must_use]
    pub fn with_discard_hit_err(mut self, discard: bool) -> Self {
        self.discard_hit_err = discard;
        self
    }

    /// Sets the expected upstream latency.
    #[must_use]
    pub fn with_expected_latency(mut self, ticks: u32) -> Self {
        self.expected_latency_ticks = ticks;
        self
    }

    /// Sets the enabled link mask.
    #[must_use]
    pub fn with_enabled_links(mut self, mask: u16) -> Self {
        self.enabled_links = mask;
        self
    }

    /// Sets the flush grace period.
    #[must_use]
    pub fn with_flush_timeout(mut self, ticks: u32) -> Self {
        self.flush_timeout_ticks = ticks;
        self
    }

    /// Sets the debug side-channel capacity.
    #[must_use]
    pub fn with_debug_capacity(mut self, capacity: usize) -> Self {
        self.debug_capacity = capacity;
        self
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, does not parse, or
    /// fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let json_config: JsonConfig = serde_json::from_reader(reader)?;
        Self::from_json_config(json_config)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the string does not parse or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let json_config: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json_config)
    }

    fn from_json_config(config: JsonConfig) -> Result<Self> {
        let frontend = config.frontend;
        let config = Self {
            go: frontend.run_control.go,
            force_stop: frontend.run_control.force_stop,
            soft_reset: frontend.run_control.soft_reset,
            hit_mode: frontend.datapath.hit_mode,
            bypass_rebase: frontend.datapath.bypass_rebase,
            discard_hit_err: frontend.datapath.discard_hit_err,
            expected_latency_ticks: frontend.datapath.expected_latency_ticks,
            enabled_links: frontend.links.enabled_mask,
            flush_timeout_ticks: frontend.links.flush_timeout_ticks,
            debug_capacity: frontend.debug.capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that an expected latency can be honoured.
    ///
    /// The latency must outlast the pipeline, and twice the latency window
    /// (in local ticks) must fit inside one wrap period so that the upper
    /// tail used for wrap disambiguation never overlaps fresh hits.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the violated bound.
    pub fn validate_latency(ticks: u32) -> Result<()> {
        if u64::from(ticks) <= PIPELINE_LATENCY as u64 {
            return Err(Error::Config(format!(
                "expected_latency_ticks {ticks} must exceed the pipeline latency of {PIPELINE_LATENCY} ticks"
            )));
        }
        let window = 2 * u64::from(ticks) * hitrebase_core::DIVISION_RATIO;
        if window >= WRAP_PERIOD {
            return Err(Error::Config(format!(
                "expected_latency_ticks {ticks} is too large for a wrap period of {WRAP_PERIOD} local ticks"
            )));
        }
        Ok(())
    }

    /// Validate the whole configuration.
    ///
    /// This is called automatically when loading from JSON.
    /// For programmatically created configs it runs in `Processor::new`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first violated bound.
    pub fn validate(&self) -> Result<()> {
        Self::validate_latency(self.expected_latency_ticks)?;
        if self.enabled_links == 0 {
            return Err(Error::Config("at least one link must be enabled".into()));
        }
        if self.flush_timeout_ticks == 0 {
            return Err(Error::Config("flush_timeout_ticks must be non-zero".into()));
        }
        Ok(())
    }

    /// Returns true if `link` takes part in the run.
    #[inline]
    #[must_use]
    pub fn link_enabled(&self, link: u8) -> bool {
        link < 16 && self.enabled_links & (1 << link) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.go);
        assert!(!config.force_stop);
        assert_eq!(config.hit_mode, HitMode::Long);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_latency_bounds() {
        assert!(RunConfig::validate_latency(2000).is_ok());
        assert!(RunConfig::validate_latency(3276).is_ok());
        assert!(RunConfig::validate_latency(3277).is_err());
        assert!(RunConfig::validate_latency(5).is_err());
        assert!(RunConfig::validate_latency(6).is_ok());
    }

    #[test]
    fn test_no_links_rejected() {
        let config = RunConfig::default().with_enabled_links(0);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("link"), "unexpected error: {err}");
    }

    #[test]
    fn test_hit_mode_bits() {
        for mode in [HitMode::Short, HitMode::Long, HitMode::Prbs, HitMode::Unknown] {
            assert_eq!(HitMode::from_bits(mode.to_bits()), mode);
        }
        assert_eq!(HitMode::from_bits(0x5), HitMode::Long);
    }

    #[test]
    fn test_json_loading() {
        let json = r#"{
            "frontend": {
                "run_control": { "go": false, "force_stop": true },
                "datapath": {
                    "hit_mode": "short",
                    "discard_hit_err": false,
                    "expected_latency_ticks": 1500
                },
                "links": { "enabled_mask": 3, "flush_timeout_ticks": 500 },
                "debug": { "capacity": 64 }
            }
        }"#;

        let config = RunConfig::from_json(json).expect("Failed to parse JSON");

        assert!(!config.go);
        assert!(config.force_stop);
        assert!(!config.soft_reset);
        assert_eq!(config.hit_mode, HitMode::Short);
        assert!(!config.discard_hit_err);
        assert_eq!(config.expected_latency_ticks, 1500);
        assert_eq!(config.enabled_links, 3);
        assert_eq!(config.flush_timeout_ticks, 500);
        assert_eq!(config.debug_capacity, 64);
        assert!(config.link_enabled(1));
        assert!(!config.link_enabled(2));
    }

    #[test]
    fn test_json_partial_config() {
        let json = r#"{ "frontend": { "datapath": { "expected_latency_ticks": 1000 } } }"#;

        let config = RunConfig::from_json(json).expect("Should parse partial config");

        assert_eq!(config.expected_latency_ticks, 1000); // Changed
        assert!(config.go); // Default
        assert_eq!(config.enabled_links, 0x000F); // Default
    }

    #[test]
    fn test_json_empty_frontend() {
        let config = RunConfig::from_json(r#"{ "frontend": {} }"#).expect("Should parse");
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_json_invalid_latency_rejected() {
        let json = r#"{ "frontend": { "datapath": { "expected_latency_ticks": 9000 } } }"#;
        let result = RunConfig::from_json(json);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "frontend": {{ "links": {{ "enabled_mask": 1 }} }} }}"#).unwrap();

        let config = RunConfig::from_file(file.path()).unwrap();
        assert_eq!(config.enabled_links, 1);
    }
}
