use std::env;
use std::fmt::Display;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use kernel::Limits;

use crate::storage::StorageRoots;

const CURRENT_DIR: &str = "./";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_ARCHIVE_GRACE_SECS: u64 = 10;
const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024 * 1024; /* 1GB */

const PORT_VAR: &str = "ANYTOANY_PORT";
const DATA_DIR_VAR: &str = "ANYTOANY_DATA_DIR";
const ARCHIVE_GRACE_VAR: &str = "ANYTOANY_ARCHIVE_GRACE_SECS";
const MAX_REQUEST_BYTES_VAR: &str = "ANYTOANY_MAX_REQUEST_BYTES";

/// Process wide configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    /// Directory holding the `uploads`, `converted` and `archives` roots
    pub data_dir: PathBuf,
    /// How long a returned archive is kept after the response is handed off
    pub archive_grace: Duration,
    /// Upper bound of a whole request body
    pub max_request_bytes: usize,
    pub limits: Limits,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(CURRENT_DIR),
            archive_grace: Duration::from_secs(DEFAULT_ARCHIVE_GRACE_SECS),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            limits: Limits::default(),
        }
    }
}

impl Settings {
    /// Reads settings from the environment, falling back to defaults for
    /// unset or unparsable variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        let data_dir = env::var(DATA_DIR_VAR).unwrap_or_else(|_| String::from(CURRENT_DIR));
        Self {
            port: parse_or(PORT_VAR, env::var(PORT_VAR).ok(), defaults.port),
            data_dir: PathBuf::from(data_dir),
            archive_grace: Duration::from_secs(parse_or(
                ARCHIVE_GRACE_VAR,
                env::var(ARCHIVE_GRACE_VAR).ok(),
                DEFAULT_ARCHIVE_GRACE_SECS,
            )),
            max_request_bytes: parse_or(
                MAX_REQUEST_BYTES_VAR,
                env::var(MAX_REQUEST_BYTES_VAR).ok(),
                defaults.max_request_bytes,
            ),
            limits: defaults.limits,
        }
    }

    #[must_use]
    pub fn socket(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    #[must_use]
    pub fn roots(&self) -> StorageRoots {
        StorageRoots::new(&self.data_dir)
    }
}

fn parse_or<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("{name}='{raw}' ignored ({e}), using {default}");
            default
        }
    }
}
