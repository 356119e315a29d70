//! Command line arguments and configuration discovery

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use herald_dispatch::DispatchConfig;

use crate::relay::RelayOptions;

/// Environment variable naming a RON configuration file
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

/// Configuration file picked up from the working directory when no other is given
pub const DEFAULT_CONFIG_FILE: &str = "./herald.config.ron";

/// Relay lines from standard input to an HTTP endpoint
#[derive(Parser, Debug, Clone)]
#[command(name = "herald")]
#[command(about = "Relay lines from standard input to an HTTP endpoint", long_about = None)]
#[command(version)]
pub struct Args {
    /// Endpoint every line is POSTed to
    #[arg(short, long)]
    pub url: String,

    /// How often buffered lines are submitted, e.g. 500ms, 5s or 1m
    #[arg(short, long, default_value = "5s", value_parser = parse_duration)]
    pub interval: Duration,

    /// Capacity of the line buffer between standard input and the dispatcher
    #[arg(short = 'c', long = "chcap", default_value_t = 500)]
    pub line_capacity: usize,

    /// How many times a failed message is retried before it is dropped
    #[arg(short, long, default_value_t = 2)]
    pub retrials: u32,

    /// Maximum number of lines submitted per interval
    #[arg(short, long, default_value_t = 100)]
    pub messages: usize,

    /// Log level (trace, debug, info, warn, error); falls back to `LOG_LEVEL`
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// How long pending messages may take to flush on shutdown
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub shutdown_timeout: Duration,

    /// Messages admitted per second, overriding the configuration file
    #[arg(long)]
    pub rate: Option<u32>,

    /// Burst size of the rate limiter, overriding the configuration file
    #[arg(long)]
    pub burst: Option<u32>,

    /// RON file holding the dispatcher configuration
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Options for the relay loop
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            interval: self.interval,
            line_capacity: self.line_capacity,
            retrials: self.retrials,
            max_batch: self.messages,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    /// Load the dispatcher configuration and apply the command line overrides
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file was named but could not be
    /// read or parsed.
    pub fn dispatch_config(&self) -> anyhow::Result<DispatchConfig> {
        let mut config = match self.config_file()? {
            Some(path) => load_config(&path)?,
            None => DispatchConfig::default(),
        };

        if let Some(rate) = self.rate {
            config.messages_per_second = rate;
        }

        if let Some(burst) = self.burst {
            config.burst_limit = burst;
        }

        Ok(config)
    }

    /// Find the configuration file using the following precedence:
    /// 1. `--config`
    /// 2. `HERALD_CONFIG` environment variable
    /// 3. ./herald.config.ron, if it exists
    fn config_file(&self) -> anyhow::Result<Option<PathBuf>> {
        if let Some(path) = &self.config {
            return Ok(Some(path.clone()));
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            if path.exists() {
                return Ok(Some(path));
            }
            anyhow::bail!(
                "{CONFIG_ENV} points to non-existent file: {}",
                path.display()
            );
        }

        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        Ok(default.exists().then_some(default))
    }
}

/// Read a [`DispatchConfig`] from a RON file
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid RON.
pub fn load_config(path: &Path) -> anyhow::Result<DispatchConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
    })?;

    ron::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
}

/// Parse a duration such as `250ms`, `5s` or `2m`
///
/// A bare number is taken as seconds.
///
/// # Errors
///
/// Returns a description of the problem if the value is not a whole number
/// followed by an optional `ms`, `s` or `m` suffix.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);

    let amount = amount
        .parse::<u64>()
        .map_err(|_| format!("invalid duration '{value}': expected a number"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount.saturating_mul(60))),
        _ => Err(format!(
            "invalid duration '{value}': unknown unit '{unit}', expected ms, s or m"
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert_eq!(parse_duration(" 1s "), Ok(Duration::from_secs(1)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("5h").is_err());
        assert!(parse_duration("1.5s").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["herald", "--url", "http://localhost/api"]).unwrap();

        assert_eq!(args.url, "http://localhost/api");
        assert_eq!(args.interval, Duration::from_secs(5));
        assert_eq!(args.line_capacity, 500);
        assert_eq!(args.retrials, 2);
        assert_eq!(args.messages, 100);
        assert_eq!(args.shutdown_timeout, Duration::from_secs(5));
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_short_flags() {
        let args = Args::try_parse_from([
            "herald", "-u", "http://localhost/api", "-i", "100ms", "-c", "10", "-r", "4", "-m",
            "3", "-l", "debug",
        ])
        .unwrap();

        let options = args.relay_options();
        assert_eq!(options.interval, Duration::from_millis(100));
        assert_eq!(options.line_capacity, 10);
        assert_eq!(options.retrials, 4);
        assert_eq!(options.max_batch, 3);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_url_is_required() {
        assert!(Args::try_parse_from(["herald"]).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "(messages_per_second: 50, burst_limit: 5, queue_capacity: 64)"
        )
        .unwrap();

        let args = Args::try_parse_from([
            "herald",
            "--url",
            "http://localhost/api",
            "--config",
            file.path().to_str().unwrap(),
            "--rate",
            "20",
        ])
        .unwrap();

        let config = args.dispatch_config().unwrap();
        assert_eq!(config.messages_per_second, 20);
        assert_eq!(config.burst_limit, 5);
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let args = Args::try_parse_from([
            "herald",
            "--url",
            "http://localhost/api",
            "--config",
            "/nonexistent/herald.config.ron",
        ])
        .unwrap();

        assert!(args.dispatch_config().is_err());
    }
}
