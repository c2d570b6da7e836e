use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration: optional TOML file, then `KIOSK_*` overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Origin serving the roster, matcher and ledger endpoints.
    pub api_base: String,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Per-request HTTP timeout. At least 1; zero is raised on load.
    pub http_timeout_secs: u64,
    /// Frames discarded after each camera acquisition (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Frames per attendance burst. Below 2 a single still is sent.
    pub liveness_frames: usize,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:5000".to_string(),
            camera_device: "/dev/video0".to_string(),
            http_timeout_secs: 30,
            warmup_frames: 2,
            liveness_frames: 3,
            frame_width: 640,
            frame_height: 480,
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os("KIOSK_CONFIG").map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    tracing::debug!(path = %path.display(), "no config file; using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.clamp();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Override fields from `KIOSK_*` variables. Unparseable numbers are ignored.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("KIOSK_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = var("KIOSK_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        env_parse(&var, "KIOSK_HTTP_TIMEOUT_SECS", &mut self.http_timeout_secs);
        env_parse(&var, "KIOSK_WARMUP_FRAMES", &mut self.warmup_frames);
        env_parse(&var, "KIOSK_LIVENESS_FRAMES", &mut self.liveness_frames);
        env_parse(&var, "KIOSK_FRAME_WIDTH", &mut self.frame_width);
        env_parse(&var, "KIOSK_FRAME_HEIGHT", &mut self.frame_height);
    }

    /// Raise values that would make every request fail immediately.
    fn clamp(&mut self) {
        if self.http_timeout_secs == 0 {
            tracing::warn!("http_timeout_secs = 0 would fail every request; using 1");
            self.http_timeout_secs = 1;
        }
    }
}

fn env_parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("kiosk/kioskd.toml")
}
