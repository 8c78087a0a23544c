//! Host configuration persistence
//!
//! Device and recording preferences in a simple key=value file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use omega_audio::{EngineConfig, RecordFormat};

/// Host configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Engine sample rate; the device default when unset
    pub sample_rate: Option<u32>,
    /// Largest engine block in frames
    pub block_size: usize,
    /// Seconds of audio the recorder holds before it asks for more room
    pub recorder_min_seconds: f32,
    pub record_format: RecordFormat,
    /// Directory finished takes are written to
    pub record_dir: PathBuf,
    /// Bounce the master bus to disk while running
    pub record: bool,
    pub bpm: f64,
    /// Stop after this many seconds; run until killed when unset
    pub run_seconds: Option<f64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            block_size: 512,
            recorder_min_seconds: 60.0,
            record_format: RecordFormat::Wav24,
            record_dir: dirs::audio_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("omega"),
            record: false,
            bpm: 128.0,
            run_seconds: None,
        }
    }
}

impl AppConfig {
    /// Load config from the default location
    ///
    /// Returns default config if the file doesn't exist or can't be read.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("omega")
            .join("config.txt")
    }

    /// Engine settings for a device running at `sample_rate`
    pub fn engine_config(&self, sample_rate: u32) -> EngineConfig {
        EngineConfig {
            recorder_min_seconds: self.recorder_min_seconds,
            ..EngineConfig::new(self.sample_rate.unwrap_or(sample_rate), self.block_size)
        }
    }

    /// Parse config from simple key=value format. Unknown keys and values
    /// that don't parse keep their defaults.
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "sample_rate" => config.sample_rate = value.parse().ok().or(config.sample_rate),
                "block_size" => config.block_size = value.parse().unwrap_or(config.block_size),
                "recorder_min_seconds" => {
                    config.recorder_min_seconds = value.parse().unwrap_or(config.recorder_min_seconds)
                }
                "record_format" => config.record_format = RecordFormat::parse(value).unwrap_or(config.record_format),
                "record_dir" => {
                    if !value.is_empty() {
                        config.record_dir = PathBuf::from(value);
                    }
                }
                "record" => config.record = matches!(value, "true" | "yes" | "1"),
                "bpm" => config.bpm = value.parse().unwrap_or(config.bpm),
                "run_seconds" => config.run_seconds = value.parse().ok().filter(|s: &f64| *s > 0.0),
                _ => {}
            }
        }

        config
    }

    fn serialize(&self) -> String {
        let mut lines = vec!["# Omega configuration".to_string()];
        if let Some(rate) = self.sample_rate {
            lines.push(format!("sample_rate={rate}"));
        }
        lines.push(format!("block_size={}", self.block_size));
        lines.push(format!("recorder_min_seconds={}", self.recorder_min_seconds));
        let format = match self.record_format {
            RecordFormat::Wav16 => "wav16",
            RecordFormat::Wav24 => "wav24",
            RecordFormat::Wav32Float => "wav32",
            RecordFormat::Flac => "flac",
        };
        lines.push(format!("record_format={format}"));
        lines.push(format!("record_dir={}", self.record_dir.display()));
        lines.push(format!("record={}", self.record));
        lines.push(format!("bpm={}", self.bpm));
        if let Some(secs) = self.run_seconds {
            lines.push(format!("run_seconds={secs}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(AppConfig::parse(""), AppConfig::default());
    }

    #[test]
    fn test_parse_values() {
        let content = "# comment\nsample_rate=44100\nblock_size = 256\nrecord_format=flac\nbpm=140.5\nrun_seconds=10";
        let config = AppConfig::parse(content);
        assert_eq!(config.sample_rate, Some(44_100));
        assert_eq!(config.block_size, 256);
        assert_eq!(config.record_format, RecordFormat::Flac);
        assert_eq!(config.bpm, 140.5);
        assert_eq!(config.run_seconds, Some(10.0));
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = AppConfig::parse("block_size=lots\nrecord_format=mp3\nrun_seconds=-1\nnoise");
        assert_eq!(config.block_size, AppConfig::default().block_size);
        assert_eq!(config.record_format, RecordFormat::Wav24);
        assert_eq!(config.run_seconds, None);
    }

    #[test]
    fn test_engine_config_prefers_configured_rate() {
        let config = AppConfig::parse("sample_rate=96000\nrecorder_min_seconds=5");
        let engine = config.engine_config(48_000);
        assert_eq!(engine.sample_rate, 96_000);
        assert_eq!(engine.recorder_min_seconds, 5.0);
        assert_eq!(AppConfig::default().engine_config(44_100).sample_rate, 44_100);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("omega").join("config.txt");
        let config = AppConfig {
            sample_rate: Some(48_000),
            record: true,
            record_dir: PathBuf::from("/tmp/takes"),
            run_seconds: Some(3.0),
            ..AppConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }
}
