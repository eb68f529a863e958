use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use relay::SessionScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Http,
    Stdio,
}

/// Process-level settings read once at startup.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub mode: Mode,
    pub bind_addr: SocketAddr,
    pub scope: SessionScope,
    pub idle_threshold: Duration,
    pub sweep_interval: Duration,
    pub connect_timeout: Duration,
    pub allow_remote_config: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
}

impl GatewaySettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mode = match read("GATEWAY_MODE").as_deref().map(str::trim) {
            None | Some("http") => Mode::Http,
            Some("stdio") => Mode::Stdio,
            Some(other) => return Err(anyhow!("GATEWAY_MODE must be http or stdio, got '{other}'")),
        };
        let scope = match read("GATEWAY_SESSION_SCOPE").as_deref().map(str::trim) {
            None | Some("resident") => SessionScope::Resident,
            Some("request") => SessionScope::RequestScoped,
            Some(other) => {
                return Err(anyhow!(
                    "GATEWAY_SESSION_SCOPE must be resident or request, got '{other}'"
                ))
            }
        };
        let bind_addr = parse_or(&read, "GATEWAY_BIND_ADDR", "0.0.0.0:6814".parse::<SocketAddr>()?)?;
        let idle_secs: u64 = parse_or(&read, "GATEWAY_IDLE_SECS", 900)?;
        let sweep_secs: u64 = parse_or(&read, "GATEWAY_SWEEP_SECS", 60)?;
        let connect_secs: u64 = parse_or(&read, "GATEWAY_CONNECT_TIMEOUT_SECS", 10)?;
        let allow_remote_config = parse_or(&read, "GATEWAY_ALLOW_REMOTE_CONFIG", false)?;
        let database_max_connections = parse_or(&read, "GATEWAY_DATABASE_MAX_CONNECTIONS", 10)?;

        Ok(Self {
            mode,
            bind_addr,
            scope,
            idle_threshold: Duration::from_secs(idle_secs),
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
            connect_timeout: Duration::from_secs(connect_secs.max(1)),
            allow_remote_config,
            database_url: read("DATABASE_URL"),
            database_max_connections,
        })
    }
}

fn parse_or<T>(read: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match read(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: '{raw}'")),
        None => Ok(default),
    }
}
