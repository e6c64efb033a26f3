use std::time::Duration;

use hfs_core::{ClientConfig, RetryPolicy};
use thiserror::Error;

use crate::sync::conflict::{ConflictPolicy, UnknownPolicy};
use crate::sync::engine::SyncOptions;

const DEFAULT_REMOTE_ROOT: &str = "/";
const DEFAULT_UPLOAD_CONCURRENCY: u64 = 1;
const DEFAULT_RETRY_ATTEMPTS: u32 = 2;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no server configured, set HFS_URL or HFS_DOMAIN")]
    MissingServer,
    #[error("HFS_CONFLICT_POLICY: {0}")]
    InvalidPolicy(#[from] UnknownPolicy),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub server_url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub remote_root: String,
    pub policy: ConflictPolicy,
    pub concurrency: usize,
    pub retry_attempts: u32,
    pub connect_timeout: Duration,
    pub nest_under_root_name: bool,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let server_url = non_empty("HFS_URL").or_else(|| {
            non_empty("HFS_DOMAIN").map(|domain| format!("https://{}", domain.trim()))
        });
        let policy = match non_empty("HFS_CONFLICT_POLICY") {
            Some(value) => value.parse()?,
            None => ConflictPolicy::default(),
        };
        let retry_attempts = lookup("HFS_RETRY_ATTEMPTS")
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRY_ATTEMPTS);

        Ok(Self {
            server_url,
            user: non_empty("HFS_USER"),
            password: lookup("HFS_PASSWORD"),
            remote_root: non_empty("HFS_REMOTE_ROOT")
                .unwrap_or_else(|| DEFAULT_REMOTE_ROOT.to_string()),
            policy,
            concurrency: read_u64(&lookup, "HFS_UPLOAD_CONCURRENCY", DEFAULT_UPLOAD_CONCURRENCY)
                as usize,
            retry_attempts,
            connect_timeout: Duration::from_secs(read_u64(
                &lookup,
                "HFS_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )),
            nest_under_root_name: read_bool(&lookup, "HFS_NEST_ROOT_NAME", false),
        })
    }

    pub fn server_url(&self) -> Result<&str, ConfigError> {
        self.server_url.as_deref().ok_or(ConfigError::MissingServer)
    }

    /// Login pair, when a user is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let user = self.user.as_deref()?;
        Some((user, self.password.as_deref().unwrap_or_default()))
    }

    pub fn client_config(&self) -> ClientConfig {
        let defaults = RetryPolicy::default();
        ClientConfig {
            connect_timeout: self.connect_timeout,
            retry: RetryPolicy::new(self.retry_attempts, defaults.backoff),
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            concurrency: self.concurrency.max(1),
            nest_under_root_name: self.nest_under_root_name,
            ..SyncOptions::default()
        }
    }
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
