//! Runtime configuration read from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `PR_DASHBOARD_BIND_ADDR` | `0.0.0.0:5000` |
//! | `PR_DASHBOARD_DATABASE` | `pr-dashboard.db` |
//! | `PR_DASHBOARD_WEBHOOK_SECRET` | unset (signatures not checked) |
//! | `PR_DASHBOARD_STORE_TIMEOUT_MS` | `5000` |
//! | `PR_DASHBOARD_CONFLICT_POLICY` | `last-write-wins` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::projector::DEFAULT_STORE_TIMEOUT;
use crate::store::ConflictPolicy;
use crate::webhooks::WebhookSecret;

pub const ENV_BIND_ADDR: &str = "PR_DASHBOARD_BIND_ADDR";
pub const ENV_DATABASE: &str = "PR_DASHBOARD_DATABASE";
pub const ENV_WEBHOOK_SECRET: &str = "PR_DASHBOARD_WEBHOOK_SECRET";
pub const ENV_STORE_TIMEOUT_MS: &str = "PR_DASHBOARD_STORE_TIMEOUT_MS";
pub const ENV_CONFLICT_POLICY: &str = "PR_DASHBOARD_CONFLICT_POLICY";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_DATABASE: &str = "pr-dashboard.db";

/// A variable was set to something unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value for {variable}: {value:?} ({reason})")]
pub struct ConfigError {
    pub variable: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database: PathBuf,
    pub webhook_secret: Option<WebhookSecret>,
    pub store_timeout: Duration,
    pub conflict_policy: ConflictPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            database: PathBuf::from(DEFAULT_DATABASE),
            webhook_secret: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup. Unset and empty
    /// variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_addr = get(ENV_BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr.parse::<SocketAddr>().map_err(|e| ConfigError {
            variable: ENV_BIND_ADDR,
            value: bind_addr.clone(),
            reason: e.to_string(),
        })?;

        let database = get(ENV_DATABASE)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));

        let webhook_secret = get(ENV_WEBHOOK_SECRET).map(WebhookSecret::new);

        let store_timeout = match get(ENV_STORE_TIMEOUT_MS) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => {
                    return Err(ConfigError {
                        variable: ENV_STORE_TIMEOUT_MS,
                        value: raw,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Ok(ms) => Duration::from_millis(ms),
                Err(e) => {
                    return Err(ConfigError {
                        variable: ENV_STORE_TIMEOUT_MS,
                        value: raw,
                        reason: e.to_string(),
                    });
                }
            },
            None => DEFAULT_STORE_TIMEOUT,
        };

        let conflict_policy = match get(ENV_CONFLICT_POLICY) {
            Some(raw) => parse_policy(&raw).ok_or_else(|| ConfigError {
                variable: ENV_CONFLICT_POLICY,
                value: raw.clone(),
                reason: "expected last-write-wins or newer-only".to_string(),
            })?,
            None => ConflictPolicy::default(),
        };

        Ok(Config {
            bind_addr,
            database,
            webhook_secret,
            store_timeout,
            conflict_policy,
        })
    }
}

fn parse_policy(raw: &str) -> Option<ConflictPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "last-write-wins" => Some(ConflictPolicy::LastWriteWins),
        "newer-only" => Some(ConflictPolicy::NewerOnly),
        _ => None,
    }
}
