use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use parley_db::DEFAULT_TYPING_WINDOW_MS;

const DEFAULT_TYPING_DEBOUNCE_MS: u64 = 2_000;

/// Runtime settings, read from `PARLEY_*` environment variables (a `.env`
/// file is loaded first when present).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// A typing record older than this no longer counts as typing.
    pub typing_stale_ms: i64,
    /// Gateway typing signals flip back to false after this much silence.
    pub typing_debounce: Duration,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            db_path: PathBuf::from(var_or("PARLEY_DB_PATH", "parley.db")),
            host: var_or("PARLEY_HOST", "0.0.0.0"),
            port: parse_var("PARLEY_PORT", 3000)?,
            typing_stale_ms: parse_var("PARLEY_TYPING_STALE_MS", DEFAULT_TYPING_WINDOW_MS)?,
            typing_debounce: Duration::from_millis(parse_var(
                "PARLEY_TYPING_DEBOUNCE_MS",
                DEFAULT_TYPING_DEBOUNCE_MS,
            )?),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("{} is not valid: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}
