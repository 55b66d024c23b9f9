#[cfg(test)]
mod tests {

    use crate::core::{EngineConfig, SyncConfig, ThrottleConfig};

    fn temp_config_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("timeline-sync-test-{}-{}", name, uuid::Uuid::new_v4()))
            .join("engine.json")
    }

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.tolerance, 0.5);
        assert_eq!(config.large_drift, 1.0);
        assert_eq!(config.min_drift, 0.25);
        assert_eq!(config.min_seek_interval().as_millis(), 150);
    }

    #[test]
    fn test_throttle_config_default() {
        let config = ThrottleConfig::default();
        assert_eq!(config.base_interval_ms, 20.0);
        assert_eq!(config.max_interval_ms, 40.0);
        assert_eq!(config.sample_window, 30);
        assert_eq!(config.spike_frames, 5);
    }

    #[test]
    fn test_engine_config_serialization() {
        let mut config = EngineConfig::default();
        config.sync.tolerance = 0.3;
        config.throttle.max_interval_ms = 50.0;
        config.dispatch.frame_pool_capacity = 16;

        let serialized = serde_json::to_string(&config).expect("Failed to serialize config");
        let deserialized: EngineConfig = serde_json::from_str(&serialized).expect("Failed to deserialize config");

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_config_backward_compatibility() {
        // Older config files only carried the sync thresholds
        let old_config_json = r#"{
            "sync": {
                "tolerance": 0.4,
                "large_drift": 1.2
            }
        }"#;

        let config: EngineConfig = serde_json::from_str(old_config_json).expect("Failed to parse old config");

        assert_eq!(config.sync.tolerance, 0.4);
        assert_eq!(config.sync.large_drift, 1.2);
        // Missing fields fall back to defaults
        assert_eq!(config.sync.min_drift, 0.25);
        assert_eq!(config.throttle, ThrottleConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_inverted_thresholds() {
        let mut config = EngineConfig::default();
        config.sync.min_drift = 2.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.throttle.max_interval_ms = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_creates_default_file() {
        let path = temp_config_path("create");
        assert!(!path.exists());

        let config = EngineConfig::load_from(&path).expect("Failed to load config");

        assert_eq!(config, EngineConfig::default());
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_load_replaces_broken_file() {
        let path = temp_config_path("broken");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let config = EngineConfig::load_from(&path).expect("Failed to load config");
        assert_eq!(config, EngineConfig::default());

        // The broken file was rewritten with defaults
        let reloaded = EngineConfig::load_from(&path).expect("Failed to reload config");
        assert_eq!(reloaded, EngineConfig::default());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_load_keeps_valid_custom_file() {
        let path = temp_config_path("custom");
        let mut config = EngineConfig::default();
        config.sync.tolerance = 0.35;
        config.save_to(&path).expect("Failed to save config");

        let loaded = EngineConfig::load_from(&path).expect("Failed to load config");
        assert_eq!(loaded.sync.tolerance, 0.35);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
