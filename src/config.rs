use crate::audio::energy::SplitConfig;
use crate::defaults;
use crate::error::{Result, UttermillError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub batch: BatchConfig,
    pub split: SplitSettings,
    pub ttl: TtlConfig,
    pub store: StoreConfig,
}

/// Audio format configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
}

/// Batch assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Target batch duration in milliseconds.
    pub target_ms: u64,
    /// Minimum total duration for a timeout finalize to emit rather than
    /// cache.
    pub min_batch_ms: u64,
    /// Maximum utterance-index distance for merging a pending cache.
    pub utterance_merge_window: u64,
}

/// Energy splitter tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SplitSettings {
    pub max_segment_ms: u64,
    pub min_segment_ms: u64,
    pub hangover_ms: u64,
    pub max_depth: u32,
    pub window_ms: u64,
    pub min_pause_ms: u64,
    pub silence_floor: f64,
    pub silence_ratio: f64,
}

/// Expiry configuration; durations are humantime strings ("10s", "5m").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtlConfig {
    /// Budget for pending timeout audio before forced flush.
    pub pending: String,
    /// Idle ceiling for the cleanup sweep.
    pub idle_ceiling: String,
    /// Interval between cleanup sweep passes.
    pub sweep_interval: String,
}

/// Buffer store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub shards: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            target_ms: defaults::BATCH_TARGET_MS,
            min_batch_ms: defaults::MIN_BATCH_MS,
            utterance_merge_window: defaults::UTTERANCE_MERGE_WINDOW,
        }
    }
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            max_segment_ms: defaults::MAX_SEGMENT_MS,
            min_segment_ms: defaults::MIN_SEGMENT_MS,
            hangover_ms: defaults::HANGOVER_MS,
            max_depth: defaults::MAX_SPLIT_DEPTH,
            window_ms: defaults::RMS_WINDOW_MS,
            min_pause_ms: defaults::MIN_PAUSE_MS,
            silence_floor: defaults::SILENCE_FLOOR,
            silence_ratio: defaults::SILENCE_RATIO,
        }
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            pending: defaults::PENDING_TTL.to_string(),
            idle_ceiling: defaults::IDLE_CEILING.to_string(),
            sweep_interval: defaults::SWEEP_INTERVAL.to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shards: defaults::STORE_SHARDS,
        }
    }
}

impl SplitSettings {
    /// Builds the splitter tuning struct used by the audio layer.
    pub fn to_split_config(&self) -> SplitConfig {
        SplitConfig {
            max_segment_ms: self.max_segment_ms,
            min_segment_ms: self.min_segment_ms,
            hangover_ms: self.hangover_ms,
            max_depth: self.max_depth,
            window_ms: self.window_ms,
            min_pause_ms: self.min_pause_ms,
            silence_floor: self.silence_floor,
            silence_ratio: self.silence_ratio,
            flat_interval_min_ms: defaults::FLAT_INTERVAL_MIN_MS,
            flat_interval_max_ms: defaults::FLAT_INTERVAL_MAX_MS,
        }
    }
}

impl TtlConfig {
    /// Pending-cache TTL in milliseconds.
    pub fn pending_ms(&self) -> Result<u64> {
        parse_duration_ms("ttl.pending", &self.pending)
    }

    /// Idle ceiling in milliseconds.
    pub fn idle_ceiling_ms(&self) -> Result<u64> {
        parse_duration_ms("ttl.idle_ceiling", &self.idle_ceiling)
    }

    /// Sweep interval in milliseconds.
    pub fn sweep_interval_ms(&self) -> Result<u64> {
        parse_duration_ms("ttl.sweep_interval", &self.sweep_interval)
    }
}

fn parse_duration_ms(key: &str, value: &str) -> Result<u64> {
    let duration =
        humantime::parse_duration(value).map_err(|e| UttermillError::ConfigInvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    let ms = duration.as_millis() as u64;
    if ms == 0 {
        return Err(UttermillError::ConfigInvalidValue {
            key: key.to_string(),
            message: "must be a positive duration".to_string(),
        });
    }
    Ok(ms)
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Self::default()
                } else {
                    // Re-panic on invalid TOML or other errors
                    panic!("Failed to load config from {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - UTTERMILL_SAMPLE_RATE → audio.sample_rate
    /// - UTTERMILL_PENDING_TTL → ttl.pending
    /// - UTTERMILL_BATCH_TARGET_MS → batch.target_ms
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(rate) = std::env::var("UTTERMILL_SAMPLE_RATE")
            && let Ok(rate) = rate.parse::<u32>()
        {
            self.audio.sample_rate = rate;
        }
        if let Ok(ttl) = std::env::var("UTTERMILL_PENDING_TTL")
            && !ttl.is_empty()
        {
            self.ttl.pending = ttl;
        }
        if let Ok(target) = std::env::var("UTTERMILL_BATCH_TARGET_MS")
            && let Ok(target) = target.parse::<u64>()
        {
            self.batch.target_ms = target;
        }
        self
    }

    /// Validates field ranges and duration strings.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(UttermillError::ConfigInvalidValue {
                key: "audio.sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.batch.target_ms == 0 {
            return Err(UttermillError::ConfigInvalidValue {
                key: "batch.target_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.split.min_segment_ms >= self.split.max_segment_ms {
            return Err(UttermillError::ConfigInvalidValue {
                key: "split.min_segment_ms".to_string(),
                message: "must be below split.max_segment_ms".to_string(),
            });
        }
        if self.split.window_ms == 0 {
            return Err(UttermillError::ConfigInvalidValue {
                key: "split.window_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.split.silence_ratio) {
            return Err(UttermillError::ConfigInvalidValue {
                key: "split.silence_ratio".to_string(),
                message: "must be within 0.0..=1.0".to_string(),
            });
        }
        if self.store.shards == 0 {
            return Err(UttermillError::ConfigInvalidValue {
                key: "store.shards".to_string(),
                message: "must be positive".to_string(),
            });
        }
        self.ttl.pending_ms()?;
        self.ttl.idle_ceiling_ms()?;
        self.ttl.sweep_interval_ms()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.batch.target_ms, 5000);
        assert_eq!(config.ttl.pending_ms().unwrap(), 10_000);
        assert_eq!(config.ttl.idle_ceiling_ms().unwrap(), 300_000);
    }

    #[test]
    fn load_reads_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[batch]
target_ms = 4000

[ttl]
pending = "15s"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.batch.target_ms, 4000);
        assert_eq!(config.ttl.pending_ms().unwrap(), 15_000);
        // Unspecified sections keep defaults.
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.split.max_depth, 10);
    }

    #[test]
    fn load_rejects_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "batch = nonsense").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn load_or_default_returns_defaults_for_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/uttermill.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn invalid_duration_string_fails_validation() {
        let config = Config {
            ttl: TtlConfig {
                pending: "not a duration".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ttl.pending"));
    }

    #[test]
    fn zero_duration_fails_validation() {
        let config = Config {
            ttl: TtlConfig {
                pending: "0s".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_segment_bounds_fail_validation() {
        let config = Config {
            split: SplitSettings {
                min_segment_ms: 6000,
                max_segment_ms: 5000,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_shards_fail_validation() {
        let config = Config {
            store: StoreConfig { shards: 0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn split_settings_map_to_split_config() {
        let settings = SplitSettings {
            max_segment_ms: 4500,
            hangover_ms: 500,
            ..Default::default()
        };
        let split = settings.to_split_config();
        assert_eq!(split.max_segment_ms, 4500);
        assert_eq!(split.hangover_ms, 500);
        assert_eq!(split.flat_interval_min_ms, defaults::FLAT_INTERVAL_MIN_MS);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back, config);
    }
}
