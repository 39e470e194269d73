use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::OverlapPolicy;
use crate::notify::SmtpConfig;
use crate::service::DEFAULT_URGE_COOLDOWN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Process configuration, read once from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsPaths>,
    pub overlap_policy: OverlapPolicy,
    pub urge_cooldown: Duration,
    /// JSON catalog applied to organizations created empty.
    pub seed: Option<PathBuf>,
    /// `None` logs notices instead of mailing them.
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    Incomplete(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "invalid {var}={value:?}: {reason}")
            }
            ConfigError::Incomplete(msg) => write!(f, "incomplete configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let tls = match (get("ROOMBOOK_TLS_CERT"), get("ROOMBOOK_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => {
                return Err(ConfigError::Incomplete(
                    "both ROOMBOOK_TLS_CERT and ROOMBOOK_TLS_KEY must be set, or neither",
                ));
            }
        };

        let smtp = match get("ROOMBOOK_SMTP_HOST") {
            None => None,
            Some(host) => {
                let from = get("ROOMBOOK_MAIL_FROM").ok_or(ConfigError::Incomplete(
                    "ROOMBOOK_MAIL_FROM is required when ROOMBOOK_SMTP_HOST is set",
                ))?;
                let username = get("ROOMBOOK_SMTP_USER");
                let password = get("ROOMBOOK_SMTP_PASSWORD");
                if username.is_some() != password.is_some() {
                    return Err(ConfigError::Incomplete(
                        "both ROOMBOOK_SMTP_USER and ROOMBOOK_SMTP_PASSWORD must be set, or neither",
                    ));
                }
                Some(SmtpConfig {
                    host,
                    port: parse_or(&get, "ROOMBOOK_SMTP_PORT", 587)?,
                    username,
                    password,
                    from,
                })
            }
        };

        let max_connections: usize = parse_or(&get, "ROOMBOOK_MAX_CONNECTIONS", 256)?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "ROOMBOOK_MAX_CONNECTIONS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let urge_cooldown = match parse_opt::<u64>(&get, "ROOMBOOK_URGE_COOLDOWN_SECS")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    var: "ROOMBOOK_URGE_COOLDOWN_SECS",
                    value: "0".into(),
                    reason: "must be at least 1".into(),
                });
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_URGE_COOLDOWN,
        };

        Ok(Self {
            port: parse_or(&get, "ROOMBOOK_PORT", 5433)?,
            bind: get("ROOMBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: get("ROOMBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: get("ROOMBOOK_PASSWORD").unwrap_or_else(|| "roombook".into()),
            max_connections,
            compact_threshold: parse_or(&get, "ROOMBOOK_COMPACT_THRESHOLD", 1000)?,
            metrics_port: parse_opt(&get, "ROOMBOOK_METRICS_PORT")?,
            tls,
            overlap_policy: parse_or(&get, "ROOMBOOK_OVERLAP_POLICY", OverlapPolicy::General)?,
            urge_cooldown,
            seed: get("ROOMBOOK_SEED").map(PathBuf::from),
            smtp,
        })
    }
}

fn parse_opt<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        None => Ok(None),
        Some(value) => match value.trim().parse::<T>() {
            Ok(v) => Ok(Some(v)),
            Err(e) => Err(ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(get, var)?.unwrap_or(default))
}
