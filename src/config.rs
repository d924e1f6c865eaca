//! Configuration management
//!
//! Includes smart CPU detection for optimal resource utilization.

use crate::error::ConvertError;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

pub const DEFAULT_QUALITY: u8 = 90;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Maximum file size allowed in bytes
    pub max_file_size: usize,
    /// Maximum image resolution (width or height)
    pub max_resolution: u32,
    /// Default JPEG quality (1-100)
    pub default_quality: u8,
    /// Number of conversions allowed to run at once
    pub worker_count: usize,
    /// Maximum number of live conversion sessions
    pub max_sessions: usize,
    /// Seconds an idle session is kept before it may be evicted
    pub session_ttl_secs: u64,
    /// Server port
    pub server_port: u16,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

/// Guards applied by the engine before any pixel work starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_file_size: usize,
    pub max_resolution: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            max_resolution: 16384,
        }
    }
}

/// Chroma subsampling written into the JPEG frame header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ChromaSubsampling {
    #[default]
    #[serde(rename = "420")]
    Cs420,
    #[serde(rename = "422")]
    Cs422,
    #[serde(rename = "444")]
    Cs444,
}

impl std::str::FromStr for ChromaSubsampling {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "420" | "4:2:0" => Ok(ChromaSubsampling::Cs420),
            "422" | "4:2:2" => Ok(ChromaSubsampling::Cs422),
            "444" | "4:4:4" => Ok(ChromaSubsampling::Cs444),
            other => Err(ConvertError::InvalidInput(format!(
                "unknown chroma subsampling '{other}' (expected 420, 422 or 444)"
            ))),
        }
    }
}

/// Per-request conversion options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    /// JPEG quality (1-100)
    pub quality: u8,
    /// Longest output edge; larger images are downscaled, smaller ones untouched
    pub max_dimension: Option<u32>,
    pub chroma: ChromaSubsampling,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            max_dimension: None,
            chroma: ChromaSubsampling::default(),
        }
    }
}

impl ConversionOptions {
    pub fn validate(&self) -> Result<(), ConvertError> {
        if !(1..=100).contains(&self.quality) {
            return Err(ConvertError::InvalidInput(format!(
                "quality {} out of range 1-100",
                self.quality
            )));
        }
        if self.max_dimension == Some(0) {
            return Err(ConvertError::InvalidInput(
                "max_dimension must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Smart CPU detection for optimal worker configuration
///
/// Reserves one core for async I/O on machines with more than four,
/// and never goes below two workers.
fn detect_optimal_workers() -> usize {
    let logical_cores = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4);

    let workers = if logical_cores > 4 {
        logical_cores - 1
    } else {
        logical_cores
    };

    workers.max(2)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_file_size: limits.max_file_size,
            max_resolution: limits.max_resolution,
            default_quality: DEFAULT_QUALITY,
            worker_count: detect_optimal_workers(),
            max_sessions: 256,
            session_ttl_secs: 600,
            server_port: 3000,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok(); // Load .env if present

        let defaults = Config::default();
        Self {
            max_file_size: env_or("MAX_FILE_SIZE", defaults.max_file_size),
            max_resolution: env_or("MAX_RESOLUTION", defaults.max_resolution),
            default_quality: env_or("DEFAULT_QUALITY", defaults.default_quality).clamp(1, 100),
            worker_count: env_or("WORKER_COUNT", defaults.worker_count).max(1),
            max_sessions: env_or("MAX_SESSIONS", defaults.max_sessions).max(1),
            session_ttl_secs: env_or("SESSION_TTL_SECS", defaults.session_ttl_secs),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_file_size: self.max_file_size,
            max_resolution: self.max_resolution,
        }
    }

    pub fn default_options(&self) -> ConversionOptions {
        ConversionOptions {
            quality: self.default_quality,
            ..ConversionOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        let options = ConversionOptions::default();
        assert_eq!(options.quality, 90);
        assert_eq!(options.chroma, ChromaSubsampling::Cs420);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_quality() {
        for quality in [0, 101] {
            let options = ConversionOptions {
                quality,
                ..Default::default()
            };
            assert!(matches!(
                options.validate(),
                Err(ConvertError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn rejects_zero_max_dimension() {
        let options = ConversionOptions {
            max_dimension: Some(0),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn parses_chroma_spellings() {
        assert_eq!("4:2:2".parse::<ChromaSubsampling>().unwrap(), ChromaSubsampling::Cs422);
        assert_eq!("444".parse::<ChromaSubsampling>().unwrap(), ChromaSubsampling::Cs444);
        assert!("411".parse::<ChromaSubsampling>().is_err());
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: ConversionOptions =
            serde_json::from_str(r#"{"max_dimension": 1024, "chroma": "444"}"#).unwrap();
        assert_eq!(options.quality, 90);
        assert_eq!(options.max_dimension, Some(1024));
        assert_eq!(options.chroma, ChromaSubsampling::Cs444);
    }
}
