use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Thresholds for reconciling the media element with the virtual position.
/// Drift values are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Drift accepted while the element plays natively inside the segment
    pub tolerance: f64,
    /// Drift above which a seek is issued immediately
    pub large_drift: f64,
    /// Drift above which a spaced correction seek is allowed
    pub min_drift: f64,
    pub min_seek_interval_ms: u64,
    /// Frames between issuing a seek and the target frame presenting
    pub seek_latency_frames: f64,
    pub max_predictive_offset: f64,
    /// Upper bound for the predictive offset relative to the segment's real length
    pub predictive_segment_fraction: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.5,
            large_drift: 1.0,
            min_drift: 0.25,
            min_seek_interval_ms: 150,
            seek_latency_frames: 2.0,
            max_predictive_offset: 0.25,
            predictive_segment_fraction: 0.1,
        }
    }
}

impl SyncConfig {
    pub fn min_seek_interval(&self) -> Duration {
        Duration::from_millis(self.min_seek_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub base_interval_ms: f64,
    pub max_interval_ms: f64,
    pub step_ms: f64,
    pub evaluation_period_ms: f64,
    pub sample_window: usize,
    pub slow_ratio: f64,
    pub fast_ratio: f64,
    pub spike_factor: f64,
    pub spike_frames: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 20.0, // ~50 fps
            max_interval_ms: 40.0,  // ~25 fps
            step_ms: 5.0,
            evaluation_period_ms: 500.0,
            sample_window: 30,
            slow_ratio: 1.5,
            fast_ratio: 0.8,
            spike_factor: 2.0,
            spike_frames: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub coalesce_window_ms: f64,
    pub frame_pool_capacity: usize,
    pub event_channel_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 5.0,
            frame_pool_capacity: 8,
            event_channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub recent_cache_capacity: usize,
    pub rebuild_interval_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            recent_cache_capacity: 8,
            rebuild_interval_ms: 1000,
        }
    }
}

impl ResolverConfig {
    pub fn rebuild_interval(&self) -> Duration {
        Duration::from_millis(self.rebuild_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sync: SyncConfig,
    pub throttle: ThrottleConfig,
    pub dispatch: DispatchConfig,
    pub resolver: ResolverConfig,
}

impl EngineConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Loads the config at `config_path`, writing defaults when the file is
    /// missing, unreadable as JSON, or holds out-of-range values.
    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to read config file at {}: {}", config_path.display(), e))?;

            match serde_json::from_str::<Self>(&content).map_err(anyhow::Error::from).and_then(|c| {
                c.validate()?;
                Ok(c)
            }) {
                Ok(config) => {
                    log::info!("Loaded engine config from {}", config_path.display());
                    Ok(config)
                }
                Err(e) => {
                    log::warn!("Config file exists but has issues ({}), replacing it with defaults", e);
                    let config = Self::default();
                    config.save_to(config_path)
                        .map_err(|save_err| anyhow::anyhow!("Failed to save new config: {}", save_err))?;
                    Ok(config)
                }
            }
        } else {
            log::info!("No config file found, creating default config at {}", config_path.display());
            let config = Self::default();
            config.save_to(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to save default config: {}", e))?;
            Ok(config)
        }
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("timeline-sync")
            .join("engine.json")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let sync = &self.sync;
        if !(sync.tolerance > 0.0 && sync.min_drift > 0.0 && sync.large_drift > sync.min_drift) {
            anyhow::bail!(
                "Drift thresholds must satisfy 0 < min_drift < large_drift and tolerance > 0 (got {}, {}, {})",
                sync.min_drift, sync.large_drift, sync.tolerance
            );
        }
        if sync.seek_latency_frames < 0.0 || sync.max_predictive_offset < 0.0 {
            anyhow::bail!("Predictive seek parameters must not be negative");
        }

        let throttle = &self.throttle;
        if !(throttle.base_interval_ms > 0.0
            && throttle.max_interval_ms.is_finite()
            && throttle.max_interval_ms >= throttle.base_interval_ms)
        {
            anyhow::bail!(
                "Throttle window must satisfy 0 < base <= max (got {} / {})",
                throttle.base_interval_ms, throttle.max_interval_ms
            );
        }
        if throttle.sample_window == 0 || throttle.step_ms <= 0.0 {
            anyhow::bail!("Throttle sample window and step must be positive");
        }

        if self.dispatch.event_channel_capacity == 0 {
            anyhow::bail!("Event channel capacity must be positive");
        }
        if self.resolver.recent_cache_capacity == 0 {
            anyhow::bail!("Resolver cache capacity must be positive");
        }
        Ok(())
    }
}
