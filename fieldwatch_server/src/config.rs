//! Server configuration, read once from `FW_*` environment variables.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use fieldwatch::{DetectorKind, LabelOverrides, PipelineConfig};
use thiserror::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1:5000";
pub const DEFAULT_VIDEO_DIR: &str = "static/videos";

#[derive(Debug, Error, PartialEq)]
#[error("invalid value `{value}` for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Directory scanned once at startup for camera video files.
    pub video_dir: PathBuf,
    pub detector: DetectorKind,
    pub pipeline: PipelineConfig,
    /// Period of the automatic reopen probe. `None` leaves reopening to the API.
    pub reopen_interval: Option<Duration>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = PipelineConfig::default();

        let cycle_ms: u64 = parse_or(&lookup, "FW_CYCLE_MS", defaults.cycle_delay.as_millis() as u64)?;
        let pipeline = PipelineConfig {
            cycle_delay: Duration::from_millis(cycle_ms),
            max_frame_width: parse_or(&lookup, "FW_MAX_WIDTH", defaults.max_frame_width)?,
            jpeg_quality: parse_or(&lookup, "FW_JPEG_QUALITY", defaults.jpeg_quality)?,
            label_overrides: parse_or(&lookup, "FW_LABEL_OVERRIDES", LabelOverrides::default())?,
            strict_classes: parse_flag(&lookup, "FW_STRICT_CLASSES", defaults.strict_classes)?,
            ..defaults
        };

        let reopen_interval = match lookup("FW_REOPEN_INTERVAL_SECS") {
            Some(raw) if !raw.trim().is_empty() => {
                let secs: u64 = parse_value("FW_REOPEN_INTERVAL_SECS", &raw)?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            _ => None,
        };

        Ok(Self {
            bind_addr: lookup("FW_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            video_dir: lookup("FW_VIDEO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VIDEO_DIR)),
            detector: parse_or(&lookup, "FW_DETECTOR", DetectorKind::Motion)?,
            pipeline,
            reopen_interval,
        })
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_flag(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError {
            key,
            value: raw,
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr, DEFAULT_BIND);
        assert_eq!(cfg.video_dir, PathBuf::from(DEFAULT_VIDEO_DIR));
        assert_eq!(cfg.detector, DetectorKind::Motion);
        assert_eq!(cfg.pipeline.cycle_delay, Duration::from_millis(50));
        assert_eq!(cfg.pipeline.max_frame_width, 1280);
        assert_eq!(cfg.pipeline.jpeg_quality, 85);
        assert!(cfg.pipeline.label_overrides.is_empty());
        assert!(cfg.pipeline.strict_classes);
        assert_eq!(cfg.reopen_interval, None);
    }

    #[test]
    fn reads_every_variable() {
        let cfg = config(&[
            ("FW_BIND", "0.0.0.0:8080"),
            ("FW_VIDEO_DIR", "/srv/videos"),
            ("FW_DETECTOR", "none"),
            ("FW_LABEL_OVERRIDES", "1=cow,2=goat"),
            ("FW_CYCLE_MS", "100"),
            ("FW_MAX_WIDTH", "640"),
            ("FW_JPEG_QUALITY", "70"),
            ("FW_STRICT_CLASSES", "false"),
            ("FW_REOPEN_INTERVAL_SECS", "30"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.video_dir, PathBuf::from("/srv/videos"));
        assert_eq!(cfg.detector, DetectorKind::None);
        assert_eq!(cfg.pipeline.label_overrides.forced_label(2), Some("goat"));
        assert_eq!(cfg.pipeline.cycle_delay, Duration::from_millis(100));
        assert_eq!(cfg.pipeline.max_frame_width, 640);
        assert_eq!(cfg.pipeline.jpeg_quality, 70);
        assert!(!cfg.pipeline.strict_classes);
        assert_eq!(cfg.reopen_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_bad_values_naming_the_key() {
        let err = config(&[("FW_CYCLE_MS", "fast")]).unwrap_err();
        assert_eq!(err.key, "FW_CYCLE_MS");
        let err = config(&[("FW_DETECTOR", "yolo")]).unwrap_err();
        assert_eq!(err.key, "FW_DETECTOR");
        let err = config(&[("FW_STRICT_CLASSES", "maybe")]).unwrap_err();
        assert_eq!(err.key, "FW_STRICT_CLASSES");
        let err = config(&[("FW_LABEL_OVERRIDES", "cow")]).unwrap_err();
        assert_eq!(err.key, "FW_LABEL_OVERRIDES");
    }

    #[test]
    fn zero_reopen_interval_disables_the_probe() {
        let cfg = config(&[("FW_REOPEN_INTERVAL_SECS", "0")]).unwrap();
        assert_eq!(cfg.reopen_interval, None);
    }
}
