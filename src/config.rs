//! Engine and host settings, loadable from TOML

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for the audio processor, its output ring and the sync host.
///
/// Every field has a default, so a partial file (or an empty one) is fine:
///
/// ```toml
/// sample_rate = 48000
/// listen_addr = "0.0.0.0:4242"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub sample_rate: u32,
    /// Frames rendered per tick by [`RingOutput`](crate::RingOutput)
    pub block_size: usize,
    /// Interleaved output channels, 1 or 2
    pub channels: usize,
    /// Ring buffer size in samples
    pub ring_capacity: usize,
    /// Where the TCP host listens
    pub listen_addr: String,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 256,
            channels: 2,
            ring_capacity: 8_192,
            listen_addr: "127.0.0.1:4242".to_string(),
        }
    }
}

impl SynthConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(SynthConfig::from_toml_str("").unwrap(), SynthConfig::default());
    }

    #[test]
    fn partial_override() {
        let config = SynthConfig::from_toml_str("sample_rate = 48000\nchannels = 1\n").unwrap();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.block_size, 256);
    }

    #[test]
    fn bad_types_are_parse_errors() {
        let err = SynthConfig::from_toml_str("sample_rate = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = SynthConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
