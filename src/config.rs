use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `BOOKD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the log is rewritten.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "bookd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "invalid {var}={value:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            port: parse_var(&lookup, "BOOKD_PORT")?.unwrap_or(defaults.port),
            bind: lookup("BOOKD_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("BOOKD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("BOOKD_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_var(&lookup, "BOOKD_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parse_var(&lookup, "BOOKD_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse_var(&lookup, "BOOKD_METRICS_PORT")?,
            tls_cert: lookup("BOOKD_TLS_CERT").map(PathBuf::from),
            tls_key: lookup("BOOKD_TLS_KEY").map(PathBuf::from),
        };
        if config.max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "BOOKD_MAX_CONNECTIONS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookd.wal")
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
    }
}
