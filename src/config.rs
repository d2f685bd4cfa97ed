//! Configuration of the engine.

use std::{fmt, fs, io};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use log::LevelFilter;
use serde::de;
use serde::{Deserialize, Deserializer};
use crate::commons::util::log_context;
use crate::constants::{
    BGP_IPV4_PREFIX_LEN_FLOOR, BGP_IPV6_PREFIX_LEN_FLOOR,
    BGP_RIS_VISIBILITY_THRESHOLD, DFLT_COMMAND_MAX_ATTEMPTS,
    DFLT_COMMAND_RETRY_BASE_MS, DFLT_COMMAND_RETRY_JITTER_MS,
    DFLT_LOCK_TIMEOUT_MS, DFLT_LOG_LEVEL,
};


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn log_level() -> LevelFilter {
        LevelFilter::from_str(DFLT_LOG_LEVEL).unwrap_or(LevelFilter::Info)
    }

    fn max_attempts() -> u32 {
        DFLT_COMMAND_MAX_ATTEMPTS
    }

    fn retry_base_ms() -> u64 {
        DFLT_COMMAND_RETRY_BASE_MS
    }

    fn retry_jitter_ms() -> u64 {
        DFLT_COMMAND_RETRY_JITTER_MS
    }

    fn lock_timeout_ms() -> u64 {
        DFLT_LOCK_TIMEOUT_MS
    }

    fn visibility_threshold() -> u32 {
        BGP_RIS_VISIBILITY_THRESHOLD
    }

    fn ipv4_prefix_len_floor() -> u8 {
        BGP_IPV4_PREFIX_LEN_FLOOR
    }

    fn ipv6_prefix_len_floor() -> u8 {
        BGP_IPV6_PREFIX_LEN_FLOOR
    }
}


//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default)]
    pub log_file: Option<PathBuf>,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "crate::commons::util::ext_serde::de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default)]
    pub commands: CommandConfig,

    #[serde(default)]
    pub bgp: BgpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_type: ConfigDefaults::log_type(),
            log_file: None,
            log_level: ConfigDefaults::log_level(),
            commands: CommandConfig::default(),
            bgp: BgpConfig::default(),
        }
    }
}

impl Config {
    pub fn parse(file_path: &str) -> Result<Self, ConfigError> {
        let v = fs::read_to_string(file_path).map_err(|e| {
            ConfigError::Other(format!(
                "Could not read config file '{}': {}",
                file_path, e
            ))
        })?;

        Self::parse_str(&v)
    }

    pub fn parse_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s).map_err(|err| {
            ConfigError::Other(format!("Error parsing config file: {err}"))
        })?;
        config.verify()?;
        Ok(config)
    }

    fn verify(&self) -> Result<(), ConfigError> {
        if self.commands.max_attempts == 0 {
            return Err(ConfigError::other(
                "commands.max_attempts must be at least 1"
            ))
        }
        if self.bgp.ipv4_prefix_len_floor > 32 {
            return Err(ConfigError::other(
                "bgp.ipv4_prefix_len_floor must not exceed 32"
            ))
        }
        if self.bgp.ipv6_prefix_len_floor > 128 {
            return Err(ConfigError::other(
                "bgp.ipv6_prefix_len_floor must not exceed 128"
            ))
        }
        if self.log_type == LogType::File && self.log_file.is_none() {
            return Err(ConfigError::other(
                "log_file not configured with log_type = \"file\""
            ))
        }
        Ok(())
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(),
            LogType::Stderr => self.stderr_logger(),
        }
    }

    fn file_logger(&self) -> Result<(), ConfigError> {
        let path = self.log_file.as_ref().ok_or(ConfigError::Other(
            "log_file not configured with log_type = \"file\"".to_owned(),
        ))?;
        let log_file = fern::log_file(path).map_err(|e| {
            ConfigError::Other(format!(
                "Failed to open log file '{}': {}",
                path.display(),
                e
            ))
        })?;

        self.fern_logger().chain(log_file).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init file logging: {}", e))
        })
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger().chain(io::stderr()).apply().map_err(|e| {
            ConfigError::Other(format!(
                "Failed to init stderr logging: {}",
                e
            ))
        })
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);
        let store_level = self.log_level.min(LevelFilter::Debug);

        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;

        fern::Dispatch::new()
            .format(move |out, message, record| {
                let context = log_context::current().map(|context| {
                    format!("[{}] ", context)
                }).unwrap_or_default();
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}{}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        context,
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}{}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        context,
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("rpki", framework_level)
            .level_for("rpkicore::commons::eventsourcing", store_level)
    }
}


//------------ CommandConfig -------------------------------------------------

/// Retry and locking behaviour of the command engine.
#[derive(Clone, Debug, Deserialize)]
pub struct CommandConfig {
    /// How often a command is attempted before a conflict is surfaced.
    #[serde(default = "ConfigDefaults::max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "ConfigDefaults::retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "ConfigDefaults::retry_jitter_ms")]
    pub retry_jitter_ms: u64,

    #[serde(default = "ConfigDefaults::lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl CommandConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Returns the time to wait before the given retry.
    ///
    /// The first retry is number 0.
    pub fn backoff(&self, retry: u32) -> Duration {
        let jitter = if self.retry_jitter_ms > 0 {
            rand::random_range(0..self.retry_jitter_ms)
        }
        else {
            0
        };
        let ms = (self.retry_base_ms + jitter)
            .checked_shl(retry)
            .unwrap_or(u64::MAX);
        Duration::from_millis(ms)
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        CommandConfig {
            max_attempts: ConfigDefaults::max_attempts(),
            retry_base_ms: ConfigDefaults::retry_base_ms(),
            retry_jitter_ms: ConfigDefaults::retry_jitter_ms(),
            lock_timeout_ms: ConfigDefaults::lock_timeout_ms(),
        }
    }
}


//------------ BgpConfig -----------------------------------------------------

/// Filtering applied when building the announcement index.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub struct BgpConfig {
    #[serde(default = "ConfigDefaults::visibility_threshold")]
    pub visibility_threshold: u32,

    #[serde(default = "ConfigDefaults::ipv4_prefix_len_floor")]
    pub ipv4_prefix_len_floor: u8,

    #[serde(default = "ConfigDefaults::ipv6_prefix_len_floor")]
    pub ipv6_prefix_len_floor: u8,
}

impl Default for BgpConfig {
    fn default() -> Self {
        BgpConfig {
            visibility_threshold: ConfigDefaults::visibility_threshold(),
            ipv4_prefix_len_floor: ConfigDefaults::ipv4_prefix_len_floor(),
            ipv6_prefix_len_floor: ConfigDefaults::ipv6_prefix_len_floor(),
        }
    }
}


//------------ LogType -------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\" or \"file\", found : \"{}\"",
                string
            ))),
        }
    }
}


//============ Error Types ===================================================

//------------ ConfigError ---------------------------------------------------

#[derive(Clone, Debug)]
pub enum ConfigError {
    Other(String),
}

impl ConfigError {
    fn other(msg: impl fmt::Display) -> Self {
        Self::Other(msg.to_string())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Other(msg) => {
                write!(f, "{msg}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::io::Write;
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::parse_str("").unwrap();
        assert_eq!(config.log_type, LogType::Stderr);
        assert_eq!(config.log_level, LevelFilter::Info);
        assert_eq!(config.commands.max_attempts, 3);
        assert_eq!(config.bgp, BgpConfig::default());
        assert_eq!(config.bgp.visibility_threshold, 5);
        assert_eq!(config.bgp.ipv4_prefix_len_floor, 8);
        assert_eq!(config.bgp.ipv6_prefix_len_floor, 12);
    }

    #[test]
    fn parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\n\
             \n\
             [commands]\n\
             max_attempts = 5\n\
             retry_base_ms = 0\n\
             retry_jitter_ms = 0\n\
             \n\
             [bgp]\n\
             visibility_threshold = 10\n"
        ).unwrap();

        let config = Config::parse(
            file.path().to_str().unwrap()
        ).unwrap();
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.commands.max_attempts, 5);
        assert_eq!(config.commands.lock_timeout_ms, 5_000);
        assert_eq!(config.commands.backoff(3), Duration::ZERO);
        assert_eq!(config.bgp.visibility_threshold, 10);
        assert_eq!(config.bgp.ipv4_prefix_len_floor, 8);
    }

    #[test]
    fn reject_invalid() {
        assert!(Config::parse_str("log_type = \"syslog\"").is_err());
        assert!(Config::parse_str("log_type = \"file\"").is_err());
        assert!(Config::parse_str("[commands]\nmax_attempts = 0").is_err());
        assert!(Config::parse("/no/such/rpkicore.conf").is_err());
    }

    #[test]
    fn backoff_grows() {
        let config = CommandConfig {
            retry_base_ms: 20,
            retry_jitter_ms: 30,
            ..Default::default()
        };
        for retry in 0..3 {
            let backoff = config.backoff(retry).as_millis() as u64;
            assert!(backoff >= 20 << retry);
            assert!(backoff < 50 << retry);
        }
    }
}
