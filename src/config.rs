//! Command line configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::fetcher::DEFAULT_KEY_URL;

/// Keep an authorized_keys file in sync with a GitHub user's public SSH keys
#[derive(Parser, Debug)]
#[command(name = "github-key-sync", version, about)]
pub struct Args {
    /// GitHub username whose keys are synced
    #[arg(env = "GITHUB_USERNAME")]
    pub username: String,

    /// Interval to sync keys at (e.g. 90, 30s, 5m, 1h30m)
    #[arg(long, default_value = "1m", env = "SYNC_INTERVAL", value_parser = parse_duration)]
    pub sync_interval: Duration,

    /// Sync just once then exit
    #[arg(long, alias = "disable-periodic-sync")]
    pub once: bool,

    /// authorized_keys file to write keys into (default: ~/.ssh/authorized_keys)
    #[arg(long, env = "AUTHORIZED_KEYS_PATH")]
    pub authorized_keys_path: Option<PathBuf>,

    /// URL to fetch keys from, `{user}` is replaced with the username
    #[arg(long, default_value = DEFAULT_KEY_URL, env = "KEY_URL_TEMPLATE")]
    pub key_url: String,

    /// Dry run - log the changes without writing the file
    #[arg(long)]
    pub dry_run: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Output format for the one-shot report
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
}

impl Args {
    /// Target file, falling back to `~/.ssh/authorized_keys`
    pub fn resolve_authorized_keys_path(&self) -> Option<PathBuf> {
        self.authorized_keys_path
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".ssh").join("authorized_keys")))
    }
}

/// Parse `90`, `30s`, `5m`, `2h` or combinations such as `1h30m`.
/// A bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    if let Ok(secs) = input.parse::<u64>() {
        return check_bounds(Duration::from_secs(secs), input);
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            _ => return Err(format!("invalid duration unit '{}' in '{}'", c, input)),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("missing number before '{}' in '{}'", c, input))?;
        let secs = value
            .checked_mul(unit)
            .ok_or_else(|| format!("duration '{}' is too large", input))?;
        total = total
            .checked_add(Duration::from_secs(secs))
            .ok_or_else(|| format!("duration '{}' is too large", input))?;
        digits.clear();
    }

    if !digits.is_empty() {
        return Err(format!("missing unit after '{}' in '{}'", digits, input));
    }

    check_bounds(total, input)
}

/// Longest accepted sync interval, about 136 years
pub const MAX_SYNC_INTERVAL: Duration = Duration::from_secs(u32::MAX as u64);

fn check_bounds(duration: Duration, input: &str) -> Result<Duration, String> {
    if duration.is_zero() {
        Err(format!("sync interval must be positive, got '{}'", input))
    } else if duration > MAX_SYNC_INTERVAL {
        Err(format!("duration '{}' is too large", input))
    } else {
        Ok(duration)
    }
}
