//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of workers, each running one job at a time
    pub concurrency: usize,
    /// Videos longer than this many seconds are trimmed
    pub max_video_duration: u64,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// Graceful drain period before media operations are cancelled
    pub shutdown_timeout: Duration,
    /// Bound on a single media operation, zero for none
    pub ffmpeg_timeout: Duration,
    /// How long one consume call blocks waiting for work
    pub poll_interval: Duration,
    /// Prometheus listener address
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_video_duration: 30,
            work_dir: PathBuf::from("/tmp/vproc"),
            shutdown_timeout: Duration::from_secs(30),
            ffmpeg_timeout: Duration::from_secs(3600), // 1 hour
            poll_interval: Duration::from_secs(1),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Unset variables fall back to defaults; set but unparsable ones are errors.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        let config = Self {
            concurrency: env_or("WORKER_CONCURRENCY", defaults.concurrency)?,
            max_video_duration: env_or("MAX_VIDEO_DURATION", defaults.max_video_duration)?,
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            shutdown_timeout: Duration::from_secs(env_or(
                "WORKER_SHUTDOWN_TIMEOUT",
                defaults.shutdown_timeout.as_secs(),
            )?),
            ffmpeg_timeout: Duration::from_secs(env_or(
                "WORKER_FFMPEG_TIMEOUT",
                defaults.ffmpeg_timeout.as_secs(),
            )?),
            poll_interval: Duration::from_millis(env_or(
                "WORKER_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            metrics_addr: match std::env::var("WORKER_METRICS_ADDR") {
                Ok(addr) if !addr.trim().is_empty() => Some(parse_var("WORKER_METRICS_ADDR", &addr)?),
                _ => None,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the pool relies on.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.concurrency == 0 {
            return Err(WorkerError::config_error(
                "WORKER_CONCURRENCY must be a positive integer",
            ));
        }
        if self.max_video_duration == 0 {
            return Err(WorkerError::config_error(
                "MAX_VIDEO_DURATION must be a positive integer",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(WorkerError::config_error(
                "WORKER_POLL_INTERVAL_MS must be positive",
            ));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> WorkerResult<T> {
    match std::env::var(name) {
        Ok(value) => parse_var(name, &value),
        Err(_) => Ok(default),
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> WorkerResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| WorkerError::config_error(format!("{name} has invalid value {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.max_video_duration, 30);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = WorkerConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(WorkerError::Config(_))));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let config = WorkerConfig {
            max_video_duration: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(parse_var::<usize>("WORKER_CONCURRENCY", " 4 ").unwrap(), 4);
        assert!(parse_var::<usize>("WORKER_CONCURRENCY", "-1").is_err());
        assert!(parse_var::<SocketAddr>("WORKER_METRICS_ADDR", "0.0.0.0:9000").is_ok());
    }
}
