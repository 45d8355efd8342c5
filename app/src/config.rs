use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use frames::FrameBudgetConfig;
use memory::{handle_limit, physical_memory_mb, MemoryPressureThresholds, MonitorConfig};
use serde::Deserialize;

/// Settings read from the `--config` TOML file. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub thresholds: MemoryPressureThresholds,
    pub monitor: MonitorConfig,
    /// Sized from the machine when absent.
    pub frames: Option<FrameBudgetConfig>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn frame_budget(&self) -> FrameBudgetConfig {
        self.frames
            .unwrap_or_else(|| FrameBudgetConfig::for_system(physical_memory_mb(), handle_limit()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_path_uses_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.thresholds.moderate_headroom_per_mille, 200);
        assert_eq!(config.monitor.sample_interval, Duration::from_secs(1));
        assert!(config.frames.is_none());
        assert!(config.frame_budget().max_saved_frames >= 2);
    }

    #[test]
    fn sections_override_defaults() {
        let file = write_config(
            r#"
            [thresholds]
            critical_headroom_per_mille = 50

            [monitor]
            sample_interval_ms = 250

            [frames]
            max_saved_frames = 3
            max_handles = 16
            "#,
        );
        let config = AppConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.thresholds.critical_headroom_per_mille, 50);
        assert_eq!(config.thresholds.moderate_headroom_per_mille, 200);
        assert_eq!(config.monitor.sample_interval, Duration::from_millis(250));
        assert_eq!(config.monitor.monotonic_window, Duration::from_secs(3));
        assert_eq!(
            config.frame_budget(),
            FrameBudgetConfig {
                max_saved_frames: 3,
                max_handles: 16,
            }
        );
    }

    #[test]
    fn unreadable_or_invalid_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ebb.toml");
        let err = AppConfig::load(Some(&missing)).unwrap_err();
        assert!(err.to_string().starts_with("failed to read config"));

        let file = write_config("[monitor]\nsample_interval_ms = \"soon\"\n");
        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().starts_with("failed to parse config"));
    }
}
