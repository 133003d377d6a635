use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per item (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 1.0 = 1s).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
    /// Default wait after a rate-limit signal when the platform gives no hint.
    pub rate_limit_delay_secs: u64,
    /// Separate budget for rate-limited failures; these do not consume
    /// the normal attempt budget.
    pub max_rate_limit_hits: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_secs: 1.0,
            max_delay_secs: 60,
            rate_limit_delay_secs: 60,
            max_rate_limit_hits: 3,
        }
    }
}

/// Target audio container/codec, passed through to the fetch collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
    Flac,
    Aac,
    M4a,
    Opus,
    Vorbis,
}

impl AudioFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Aac => "aac",
            AudioFormat::M4a => "m4a",
            AudioFormat::Opus => "opus",
            AudioFormat::Vorbis => "vorbis",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            "flac" => Ok(AudioFormat::Flac),
            "aac" => Ok(AudioFormat::Aac),
            "m4a" => Ok(AudioFormat::M4a),
            "opus" => Ok(AudioFormat::Opus),
            "vorbis" => Ok(AudioFormat::Vorbis),
            other => Err(ConfigError::new(format!(
                "unknown audio format '{}' (expected mp3|wav|flac|aac|m4a|opus|vorbis)",
                other
            ))),
        }
    }
}

/// Global configuration loaded from `~/.config/yadl/config.toml`.
///
/// Run-relevant values are frozen into a `ConfigSnapshot` when a batch is
/// created; editing this file never changes an existing batch's targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YadlConfig {
    /// Maximum items processed simultaneously.
    pub max_concurrent_items: usize,
    /// Per-item timeout in seconds; 0 disables the timeout.
    #[serde(default)]
    pub item_timeout_secs: u64,
    /// Output directory for audio files (None = `~/Music`, falling back to cwd).
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Target audio format.
    #[serde(default)]
    pub audio_format: AudioFormat,
    /// Target audio quality in kbps (0–320).
    pub audio_quality: String,
    /// Expand playlist references into one item per entry.
    #[serde(default)]
    pub expand_playlists: bool,
    /// How often the CLI renders a progress snapshot, in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Whether batch cancellation also aborts in-flight items (true) or
    /// lets them finish their current attempt (false).
    #[serde(default)]
    pub abort_in_flight_on_cancel: bool,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_progress_interval_ms() -> u64 {
    500
}

impl Default for YadlConfig {
    fn default() -> Self {
        Self {
            max_concurrent_items: 4,
            item_timeout_secs: 0,
            output_dir: None,
            audio_format: AudioFormat::Mp3,
            audio_quality: "192".to_string(),
            expand_playlists: false,
            progress_interval_ms: default_progress_interval_ms(),
            abort_in_flight_on_cancel: false,
            retry: None,
        }
    }
}

impl YadlConfig {
    /// Check values that would make a run impossible or nonsensical.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_items == 0 {
            return Err(ConfigError::new("max_concurrent_items must be at least 1"));
        }
        match self.audio_quality.parse::<u32>() {
            Ok(q) if q <= 320 => {}
            _ => {
                return Err(ConfigError::new(format!(
                    "audio_quality must be a number between 0 and 320, got '{}'",
                    self.audio_quality
                )))
            }
        }
        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                return Err(ConfigError::new("retry.max_attempts must be at least 1"));
            }
            if retry.base_delay_secs < 0.0 {
                return Err(ConfigError::new("retry.base_delay_secs must not be negative"));
            }
        }
        Ok(())
    }

    /// Output directory to use: configured value, else `~/Music`, else cwd.
    pub fn resolved_output_dir(&self) -> PathBuf {
        if let Some(dir) = &self.output_dir {
            return dir.clone();
        }
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join("Music"))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("yadl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<YadlConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = YadlConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: YadlConfig = toml::from_str(&data)?;
    Ok(cfg)
}
