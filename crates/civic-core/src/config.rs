use anyhow::{anyhow, Context, Result};
use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

pub fn required_env(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("missing env: {name}"))
}

pub fn socket_addr_from_env(name: &str, default: &str) -> Result<SocketAddr> {
    let value = env::var(name).unwrap_or_else(|_| default.to_string());
    SocketAddr::from_str(&value).map_err(|err| anyhow!("invalid socket addr for {name}: {err}"))
}

/// Reads `name` and parses it, falling back to `default` when unset.
pub fn parse_env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid value for {name}: {err}")),
        _ => Ok(default),
    }
}
