//! Load config from file and environment.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use envelink_core::{Pattern, Role, SocketOptions};
use serde::Deserialize;

/// Node configuration. File: ~/.config/envelink/config.toml or /etc/envelink/config.toml.
/// Env overrides: ENVELINK_ENDPOINT, ENVELINK_ROLE, ENVELINK_PATTERN, ENVELINK_POLL_INTERVAL_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Endpoint to bind (server) or connect to (client).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default = "default_pattern")]
    pub pattern: Pattern,
    /// Inproc high-water mark (default 1000).
    #[serde(default = "default_send_hwm")]
    pub send_hwm: usize,
    /// Delay between poll rounds in milliseconds (default 1).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Round trips a client performs before exiting (default 10).
    #[serde(default = "default_ping_count")]
    pub ping_count: u64,
    /// tracing filter used when RUST_LOG is unset (default "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_endpoint() -> String {
    "tcp://127.0.0.1:5555".to_string()
}
fn default_role() -> Role {
    Role::Server
}
fn default_pattern() -> Pattern {
    Pattern::ReqRep
}
fn default_send_hwm() -> usize {
    1000
}
fn default_poll_interval_ms() -> u64 {
    1
}
fn default_ping_count() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            role: default_role(),
            pattern: default_pattern(),
            send_hwm: default_send_hwm(),
            poll_interval_ms: default_poll_interval_ms(),
            ping_count: default_ping_count(),
            log_level: default_log_level(),
        }
    }
}

impl NodeConfig {
    pub fn socket_options(&self) -> SocketOptions {
        let mut opts = SocketOptions::new(self.endpoint.clone(), self.role, self.pattern);
        opts.send_hwm = self.send_hwm;
        opts
    }
}

/// Load config: explicit file if given, else the first default path that exists, else
/// defaults; then env vars on top. A file that exists must parse.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<NodeConfig> {
    let mut c = match explicit {
        Some(path) => read_file(path)?,
        None => load_first(&config_paths())?.unwrap_or_default(),
    };
    apply_env(&mut c, |key| std::env::var(key).ok())?;
    Ok(c)
}

fn read_file(path: &Path) -> anyhow::Result<NodeConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

/// Apply environment overrides. `lookup` returns the value of a variable, if set.
pub fn apply_env<F>(c: &mut NodeConfig, lookup: F) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(s) = lookup("ENVELINK_ENDPOINT") {
        c.endpoint = s;
    }
    if let Some(s) = lookup("ENVELINK_ROLE") {
        c.role = s.parse().context("ENVELINK_ROLE")?;
    }
    if let Some(s) = lookup("ENVELINK_PATTERN") {
        c.pattern = s.parse().context("ENVELINK_PATTERN")?;
    }
    if let Some(s) = lookup("ENVELINK_POLL_INTERVAL_MS") {
        c.poll_interval_ms = s
            .parse::<u64>()
            .with_context(|| format!("ENVELINK_POLL_INTERVAL_MS: '{s}'"))?;
    }
    Ok(())
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/envelink/config.toml"));
    }
    out.push(PathBuf::from("/etc/envelink/config.toml"));
    out
}

fn load_first(paths: &[PathBuf]) -> anyhow::Result<Option<NodeConfig>> {
    match paths.iter().find(|p| p.exists()) {
        Some(p) => read_file(p).map(Some),
        None => Ok(None),
    }
}
